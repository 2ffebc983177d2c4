//! Concrete events exchanged by the sample document pipeline.

use chrono::{DateTime, Utc};
use herald_events::{Event, EventHeader, EventId, Metadata};
use serde::Serialize;

/// Routing key for [`DocumentUploaded`].
pub const DOCUMENT_UPLOADED: &str = "doc.uploaded";
/// Routing key for [`EmbeddingGenerated`].
pub const EMBEDDING_GENERATED: &str = "embedding.generated";

/// A document finished uploading and is ready for downstream processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentUploaded {
    /// Identity, time, and metadata.
    #[serde(flatten)]
    pub header: EventHeader,
    /// Identifier of the stored document.
    pub document_id: String,
    /// Tenant that owns the document.
    pub tenant: String,
    /// Extracted text used for embedding.
    pub text: String,
}

impl DocumentUploaded {
    /// New upload event tagged with its tenant in metadata.
    #[must_use]
    pub fn new(
        document_id: impl Into<String>,
        tenant: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let tenant = tenant.into();
        Self {
            header: EventHeader::new().with_metadata("tenant", tenant.clone()),
            document_id: document_id.into(),
            tenant,
            text: text.into(),
        }
    }
}

impl Event for DocumentUploaded {
    fn name(&self) -> &str {
        DOCUMENT_UPLOADED
    }

    fn id(&self) -> EventId {
        self.header.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.header.timestamp
    }

    fn metadata(&self) -> &Metadata {
        &self.header.metadata
    }
}

/// An embedding vector was computed for a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingGenerated {
    /// Identity, time, and metadata.
    #[serde(flatten)]
    pub header: EventHeader,
    /// Document the embedding belongs to.
    pub document_id: String,
    /// Upload event that triggered the computation.
    pub source_event: EventId,
    /// Embedding vector.
    pub vector: Vec<f32>,
}

impl EmbeddingGenerated {
    /// New embedding event correlated with the upload that produced it.
    #[must_use]
    pub fn new(upload: &DocumentUploaded, vector: Vec<f32>) -> Self {
        Self {
            header: EventHeader::new()
                .with_metadata("tenant", upload.tenant.clone())
                .with_metadata("caused_by", upload.header.id.to_string()),
            document_id: upload.document_id.clone(),
            source_event: upload.header.id,
            vector,
        }
    }
}

impl Event for EmbeddingGenerated {
    fn name(&self) -> &str {
        EMBEDDING_GENERATED
    }

    fn id(&self) -> EventId {
        self.header.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.header.timestamp
    }

    fn metadata(&self) -> &Metadata {
        &self.header.metadata
    }
}
