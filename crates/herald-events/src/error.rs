//! Event bus error primitives.
//!
//! # Design
//! - Lifecycle errors keep constant messages and carry context in fields.
//! - Handler failures are aggregated per publish so callers can enumerate every
//!   underlying error instead of parsing a flattened string.
//! - Panics surface as ordinary errors once the recovery middleware converts them.

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::panic::Location;

use thiserror::Error;

use crate::bus::SubscriptionId;
use crate::event::{EventId, MetadataSummary};

/// Error type returned by event handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result wrapper for event bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors surfaced by [`crate::EventBus`] operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus was closed and rejects new work.
    #[error("event bus is closed")]
    Closed {
        /// Operation that was rejected.
        operation: &'static str,
    },
    /// Subscriptions require a non-empty routing key.
    #[error("event name must not be empty")]
    EmptyEventName,
    /// One or more handlers failed while an event was dispatched.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl BusError {
    /// Returns `true` for the bus-closed error.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Aggregate dispatch failure, when this error is one.
    #[must_use]
    pub const fn as_dispatch(&self) -> Option<&DispatchError> {
        match self {
            Self::Dispatch(err) => Some(err),
            _ => None,
        }
    }
}

/// Aggregate of every handler failure observed during one publish.
#[derive(Debug)]
pub struct DispatchError {
    event_name: String,
    event_id: EventId,
    failures: Vec<HandlerFailure>,
}

impl DispatchError {
    pub(crate) const fn new(
        event_name: String,
        event_id: EventId,
        failures: Vec<HandlerFailure>,
    ) -> Self {
        Self {
            event_name,
            event_id,
            failures,
        }
    }

    /// Name of the event whose handlers failed.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Identifier of the event whose handlers failed.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Individual handler failures, ordered by subscription position.
    #[must_use]
    pub fn failures(&self) -> &[HandlerFailure] {
        &self.failures
    }

    /// Consume the aggregate and return the individual failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<HandlerFailure> {
        self.failures
    }
}

impl Display for DispatchError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} handler(s) failed for event '{}' ({})",
            self.failures.len(),
            self.event_name,
            self.event_id
        )?;
        for (idx, failure) in self.failures.iter().enumerate() {
            let separator = if idx == 0 { ": " } else { "; " };
            write!(
                formatter,
                "{separator}{}: {}",
                failure.subscription, failure.source
            )?;
        }
        Ok(())
    }
}

impl StdError for DispatchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.failures
            .first()
            .map(|failure| failure as &(dyn StdError + 'static))
    }
}

/// Failure of a single handler, tagged with the event it was handling.
#[derive(Debug)]
pub struct HandlerFailure {
    event_name: String,
    subscription: SubscriptionId,
    position: usize,
    source: BoxError,
}

impl HandlerFailure {
    pub(crate) const fn new(
        event_name: String,
        subscription: SubscriptionId,
        position: usize,
        source: BoxError,
    ) -> Self {
        Self {
            event_name,
            subscription,
            position,
            source,
        }
    }

    /// Event name the failing handler was subscribed to.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Subscription token of the failing handler.
    #[must_use]
    pub const fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Position of the handler in the dispatch snapshot.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Error returned by the handler.
    #[must_use]
    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.source
    }

    /// Panic details when the handler panicked instead of returning an error.
    #[must_use]
    pub fn panic(&self) -> Option<&PanicError> {
        self.source.downcast_ref::<PanicError>()
    }

    /// Returns `true` when the failure came from a recovered panic.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        self.panic().is_some()
    }

    /// Consume the failure and return the handler error.
    #[must_use]
    pub fn into_error(self) -> BoxError {
        self.source
    }
}

impl Display for HandlerFailure {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "handler {} for event '{}' failed: {}",
            self.subscription, self.event_name, self.source
        )
    }
}

impl StdError for HandlerFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let source: &(dyn StdError + 'static) = &*self.source;
        Some(source)
    }
}

/// Source position of a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicLocation {
    file: String,
    line: u32,
    column: u32,
}

impl PanicLocation {
    /// Source file that raised the panic.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Line of the panic.
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// Column of the panic.
    #[must_use]
    pub const fn column(&self) -> u32 {
        self.column
    }
}

impl From<&Location<'_>> for PanicLocation {
    fn from(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl Display for PanicLocation {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Handler panic converted into an error value.
#[derive(Debug)]
pub struct PanicError {
    message: String,
    backtrace: Backtrace,
    metadata: MetadataSummary,
    location: Option<PanicLocation>,
}

impl PanicError {
    /// Build a panic error from the panic message and diagnostics.
    #[must_use]
    pub const fn new(message: String, backtrace: Backtrace, metadata: MetadataSummary) -> Self {
        Self {
            message,
            backtrace,
            metadata,
            location: None,
        }
    }

    /// Attach the source position the panic was raised at.
    #[must_use]
    pub fn with_location(mut self, location: PanicLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Where the panic was raised, when a panic hook observed it.
    #[must_use]
    pub const fn location(&self) -> Option<&PanicLocation> {
        self.location.as_ref()
    }

    /// Text extracted from the panic payload.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack captured while the panic unwound, or at recovery when no hook saw it.
    #[must_use]
    pub const fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Summary of the metadata carried by the event being handled.
    #[must_use]
    pub const fn metadata(&self) -> &MetadataSummary {
        &self.metadata
    }
}

impl Display for PanicError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "handler panicked: {}", self.message)
    }
}

impl StdError for PanicError {}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use uuid::Uuid;

    fn failure(id: u64, message: &str) -> HandlerFailure {
        HandlerFailure::new(
            "doc.uploaded".to_string(),
            SubscriptionId::from_raw(id),
            usize::try_from(id).unwrap_or_default(),
            Box::new(io::Error::other(message.to_string())),
        )
    }

    #[test]
    fn closed_error_is_constant() {
        let err = BusError::Closed {
            operation: "publish",
        };
        assert!(err.is_closed());
        assert!(err.as_dispatch().is_none());
        assert_eq!(err.to_string(), "event bus is closed");
    }

    #[test]
    fn dispatch_error_lists_every_failure() {
        let err = DispatchError::new(
            "doc.uploaded".to_string(),
            Uuid::nil(),
            vec![failure(1, "boom"), failure(2, "bang")],
        );

        let rendered = err.to_string();
        assert!(rendered.starts_with("2 handler(s) failed for event 'doc.uploaded'"));
        assert!(rendered.contains("sub-1: boom"));
        assert!(rendered.contains("sub-2: bang"));
        assert_eq!(err.failures().len(), 2);
        assert_eq!(err.failures()[1].position(), 2);
        assert!(err.source().is_some());

        let bus_err = BusError::from(err);
        assert!(!bus_err.is_closed());
        assert_eq!(
            bus_err.as_dispatch().map(DispatchError::event_name),
            Some("doc.uploaded")
        );
    }

    #[test]
    fn failures_can_be_taken_by_value() {
        let err = DispatchError::new(
            "doc.uploaded".to_string(),
            Uuid::nil(),
            vec![failure(1, "boom"), failure(2, "bang")],
        );
        let errors: Vec<String> = err
            .into_failures()
            .into_iter()
            .map(|failure| failure.into_error().to_string())
            .collect();
        assert_eq!(errors, vec!["boom", "bang"]);
    }

    #[test]
    fn panic_location_renders_file_line_column() {
        let here = Location::caller();
        let location = PanicLocation::from(here);
        assert_eq!(location.line(), here.line());
        assert_eq!(location.to_string(), format!("{}:{}:{}", here.file(), here.line(), here.column()));

        let report = PanicError::new(
            "kaboom".to_string(),
            Backtrace::disabled(),
            MetadataSummary::default(),
        );
        assert!(report.location().is_none());
        let report = report.with_location(location.clone());
        assert_eq!(report.location(), Some(&location));
    }

    #[test]
    fn handler_failure_detects_panics() {
        let plain = failure(3, "plain");
        assert!(!plain.is_panic());
        assert_eq!(plain.error().to_string(), "plain");

        let panicked = HandlerFailure::new(
            "doc.uploaded".to_string(),
            SubscriptionId::from_raw(4),
            0,
            Box::new(PanicError::new(
                "kaboom".to_string(),
                Backtrace::disabled(),
                MetadataSummary::default(),
            )),
        );
        assert!(panicked.is_panic());
        assert_eq!(panicked.panic().map(PanicError::message), Some("kaboom"));
        assert_eq!(
            panicked.to_string(),
            "handler sub-4 for event 'doc.uploaded' failed: handler panicked: kaboom"
        );
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("static");
        let owned_payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let other_payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(static_payload.as_ref()), "static");
        assert_eq!(panic_message(owned_payload.as_ref()), "owned");
        assert_eq!(
            panic_message(other_payload.as_ref()),
            "non-string panic payload"
        );
    }
}
