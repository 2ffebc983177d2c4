//! Event capability shared by every payload routed through the bus.
//!
//! # Design
//! - Events are polymorphic over a small capability trait rather than one enum, so
//!   producer and consumer modules can agree on payload types the core never sees.
//! - Handlers receive `dyn Event` and downcast to the concrete payload they expect.
//! - Metadata is always present (possibly empty) so diagnostics never need a null check.

use std::any::Any;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier assigned to each event instance at construction.
pub type EventId = Uuid;

/// Free-form side-channel data attached to an event.
pub type Metadata = serde_json::Map<String, Value>;

/// Event shared between the publisher and every dispatched handler.
pub type SharedEvent = Arc<dyn Event>;

/// Capability every value published on the bus must provide.
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// Routing key; identical for every instance of the same logical event type.
    fn name(&self) -> &str;

    /// Unique identifier used for log and trace correlation.
    fn id(&self) -> EventId;

    /// Creation time, fixed when the event was constructed.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Side-channel metadata; never required for dispatch.
    fn metadata(&self) -> &Metadata;
}

impl dyn Event {
    /// Returns `true` when the event is of concrete type `T`.
    #[must_use]
    pub fn is<T: Event>(&self) -> bool {
        (self as &dyn Any).is::<T>()
    }

    /// Downcast the event to its concrete payload type.
    #[must_use]
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

/// Identity, time, and metadata fields embedded by concrete event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Identifier for the event instance.
    pub id: EventId,
    /// Creation time of the event instance.
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata attached by the producer.
    #[serde(default)]
    pub metadata: Metadata,
}

impl EventHeader {
    /// Allocate a fresh identifier and timestamp with empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_metadata(key, value);
        self
    }

    /// Insert a metadata entry in place.
    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }
}

impl Default for EventHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Event whose name is chosen at runtime and whose payload is untyped JSON.
///
/// Useful for bridging producers that do not own a concrete Rust type, and
/// for exercising the bus in tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonEvent {
    name: String,
    #[serde(flatten)]
    header: EventHeader,
    payload: Value,
}

impl JsonEvent {
    /// Construct an event with a fresh header and a `null` payload.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            header: EventHeader::new(),
            payload: Value::Null,
        }
    }

    /// Replace the payload carried by the event.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.header.insert_metadata(key, value);
        self
    }

    /// Payload carried by the event.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Header fields shared with other event types.
    #[must_use]
    pub const fn header(&self) -> &EventHeader {
        &self.header
    }
}

impl Event for JsonEvent {
    fn name(&self) -> &str {
        &self.name
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

/// Upper bound, in bytes, on the metadata size estimate in a [`MetadataSummary`].
pub const METADATA_SIZE_BUDGET: usize = 64 * 1024;

/// Bounded description of an event's metadata for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataSummary {
    /// Leading metadata keys, capped at the configured limit.
    pub keys: Vec<String>,
    /// Number of keys left out of `keys`.
    pub omitted_keys: usize,
    /// Rough serialized size of keys and values in bytes, at most
    /// [`METADATA_SIZE_BUDGET`].
    pub approx_bytes: usize,
    /// The estimate stopped at the budget; the real size is larger.
    pub size_capped: bool,
}

impl MetadataSummary {
    /// Summarise `metadata`, listing at most `key_limit` keys.
    #[must_use]
    pub fn capture(metadata: &Metadata, key_limit: usize) -> Self {
        let keys: Vec<String> = metadata.keys().take(key_limit).cloned().collect();
        let omitted_keys = metadata.len().saturating_sub(keys.len());
        let mut estimate = SizeEstimate::new(METADATA_SIZE_BUDGET);
        for (key, value) in metadata {
            if estimate.exhausted() {
                break;
            }
            estimate.add(key.len());
            estimate.value(value);
        }
        Self {
            keys,
            omitted_keys,
            approx_bytes: estimate.bytes.min(estimate.limit),
            size_capped: estimate.exhausted(),
        }
    }
}

impl Display for MetadataSummary {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "keys=[{}]", self.keys.join(", "))?;
        if self.omitted_keys > 0 {
            write!(formatter, " (+{} more)", self.omitted_keys)?;
        }
        let marker = if self.size_capped { '>' } else { '~' };
        write!(formatter, " {marker}{} bytes", self.approx_bytes)
    }
}

/// Compact-JSON length estimate that stops walking once `limit` is reached.
struct SizeEstimate {
    bytes: usize,
    limit: usize,
}

impl SizeEstimate {
    const fn new(limit: usize) -> Self {
        Self { bytes: 0, limit }
    }

    const fn exhausted(&self) -> bool {
        self.bytes >= self.limit
    }

    const fn add(&mut self, bytes: usize) {
        self.bytes = self.bytes.saturating_add(bytes);
    }

    fn value(&mut self, value: &Value) {
        if self.exhausted() {
            return;
        }
        match value {
            Value::Null | Value::Bool(true) => self.add(4),
            Value::Bool(false) => self.add(5),
            Value::Number(number) => {
                let mut width = Width(0);
                if fmt::Write::write_fmt(&mut width, format_args!("{number}")).is_ok() {
                    self.add(width.0);
                }
            }
            // quotes; escapes are not counted
            Value::String(text) => self.add(text.len().saturating_add(2)),
            Value::Array(items) => {
                self.add(items.len().saturating_add(1).max(2));
                for item in items {
                    if self.exhausted() {
                        break;
                    }
                    self.value(item);
                }
            }
            Value::Object(entries) => {
                self.add(entries.len().saturating_add(1).max(2));
                for (key, item) in entries {
                    if self.exhausted() {
                        break;
                    }
                    self.add(key.len().saturating_add(3));
                    self.value(item);
                }
            }
        }
    }
}

/// Counts formatted bytes without storing them.
struct Width(usize);

impl fmt::Write for Width {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        self.0 = self.0.saturating_add(text.len());
        Ok(())
    }
}
