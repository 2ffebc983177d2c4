//! Sample consumers that react to document events.
//!
//! # Design
//! - Consumers know event types, never the producer; they find each other only
//!   through the bus and the routing keys in `payloads.rs`.
//! - The embedding generator publishes its result back onto the same bus from
//!   inside its handler, relying on publish never holding the registry lock
//!   while handlers run.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use herald_events::{Context, EventBus, Handler, HandlerResult, SharedEvent, SubscriptionId};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::payloads::{DOCUMENT_UPLOADED, DocumentUploaded, EMBEDDING_GENERATED, EmbeddingGenerated};

/// Number of dimensions produced by [`EmbeddingGenerator`].
pub const EMBEDDING_DIMENSIONS: usize = 8;

/// Computes a bag-of-bytes embedding for every uploaded document and
/// announces it as [`EmbeddingGenerated`].
#[derive(Clone)]
pub struct EmbeddingGenerator {
    bus: EventBus,
}

impl EmbeddingGenerator {
    /// Generator that publishes its results on `bus`.
    #[must_use]
    pub const fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl fmt::Debug for EmbeddingGenerator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("EmbeddingGenerator").finish_non_exhaustive()
    }
}

#[async_trait]
impl Handler for EmbeddingGenerator {
    async fn handle(&self, ctx: &Context, event: &SharedEvent) -> HandlerResult {
        let upload = event.downcast_ref::<DocumentUploaded>().ok_or_else(|| {
            io::Error::other(format!("unexpected payload for '{}'", event.name()))
        })?;
        if upload.text.trim().is_empty() {
            return Err(Box::new(io::Error::other(format!(
                "document {} has no text to embed",
                upload.document_id
            ))));
        }
        if ctx.is_done() {
            debug!(document_id = %upload.document_id, "context finished; embedding skipped");
            return Ok(());
        }

        let vector = embed(&upload.text);
        info!(
            document_id = %upload.document_id,
            dimensions = vector.len(),
            "embedding generated"
        );
        self.bus
            .publish(ctx, EmbeddingGenerated::new(upload, vector))
            .await?;
        Ok(())
    }
}

/// In-memory vector index fed by [`EmbeddingGenerated`] events.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Arc<RwLock<HashMap<String, Vec<f32>>>>,
}

impl VectorIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored vector for `document_id`.
    #[must_use]
    pub fn get(&self, document_id: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when nothing has been indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Handler for VectorIndex {
    async fn handle(&self, _ctx: &Context, event: &SharedEvent) -> HandlerResult {
        let Some(embedding) = event.downcast_ref::<EmbeddingGenerated>() else {
            return Err(Box::new(io::Error::other(format!(
                "unexpected payload for '{}'",
                event.name()
            ))));
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(embedding.document_id.clone(), embedding.vector.clone());
        debug!(document_id = %embedding.document_id, "embedding indexed");
        Ok(())
    }
}

/// Subscriptions held by the sample pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSubscriptions {
    /// Embedding generator on `doc.uploaded`.
    pub embedder: SubscriptionId,
    /// Vector index on `embedding.generated`.
    pub index: SubscriptionId,
}

/// Register the embedding generator and the vector index on `bus`.
///
/// # Errors
///
/// Returns an error when the bus rejects a subscription.
pub fn register_pipeline(bus: &EventBus, index: &VectorIndex) -> AppResult<PipelineSubscriptions> {
    let embedder = bus
        .subscribe(DOCUMENT_UPLOADED, EmbeddingGenerator::new(bus.clone()))
        .map_err(|err| AppError::bus("pipeline.subscribe_embedder", err))?;
    let index = bus
        .subscribe(EMBEDDING_GENERATED, index.clone())
        .map_err(|err| AppError::bus("pipeline.subscribe_index", err))?;
    Ok(PipelineSubscriptions { embedder, index })
}

/// Fold the text bytes into a fixed-size, L2-normalised vector.
fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; EMBEDDING_DIMENSIONS];
    for (position, byte) in text.bytes().enumerate() {
        vector[position % EMBEDDING_DIMENSIONS] += f32::from(byte);
    }
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_events::JsonEvent;

    #[test]
    fn embedding_is_normalised() {
        let vector = embed("hello embeddings");
        assert_eq!(vector.len(), EMBEDDING_DIMENSIONS);
        let norm: f32 = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embed(""), vec![0.0; EMBEDDING_DIMENSIONS]);
    }

    #[tokio::test]
    async fn upload_flows_into_the_index() -> AppResult<()> {
        let bus = EventBus::new();
        let index = VectorIndex::new();
        register_pipeline(&bus, &index)?;

        bus.publish(
            &Context::new(),
            DocumentUploaded::new("doc-1", "acme", "quarterly report"),
        )
        .await
        .map_err(|err| AppError::bus("test.publish", err))?;

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("doc-1"), Some(embed("quarterly report")));
        Ok(())
    }

    #[tokio::test]
    async fn empty_document_is_reported_as_failure() {
        let bus = EventBus::new();
        let index = VectorIndex::new();
        register_pipeline(&bus, &index).expect("pipeline registered");

        let err = bus
            .publish(&Context::new(), DocumentUploaded::new("doc-2", "acme", "  "))
            .await
            .expect_err("empty text rejected");
        let dispatch = err.as_dispatch().expect("dispatch error");
        assert!(dispatch.failures()[0].error().to_string().contains("doc-2"));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn wrong_payload_type_is_a_handler_error() {
        let bus = EventBus::new();
        register_pipeline(&bus, &VectorIndex::new()).expect("pipeline registered");

        let err = bus
            .publish(&Context::new(), JsonEvent::new(DOCUMENT_UPLOADED))
            .await
            .expect_err("untyped payload rejected");
        assert!(err.to_string().contains("unexpected payload"));
    }
}
