//! Sample events and scripted handlers.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use herald_events::{Context, EventId, Handler, HandlerResult, JsonEvent, SharedEvent};
use serde_json::json;
use tokio::sync::{Notify, Semaphore};

/// Event name used by the document scenarios.
pub const DOC_UPLOADED: &str = "doc.uploaded";

/// `doc.uploaded` event carrying a document id and tenant metadata.
#[must_use]
pub fn doc_uploaded(document_id: &str) -> JsonEvent {
    JsonEvent::new(DOC_UPLOADED)
        .with_payload(json!({ "document_id": document_id }))
        .with_metadata("tenant", "acme")
        .with_metadata("source", "fixtures")
}

/// Event with no payload and no metadata.
#[must_use]
pub fn bare_event(name: &str) -> JsonEvent {
    JsonEvent::new(name)
}

/// Observation made by a [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Name of the delivered event.
    pub event_name: String,
    /// Identifier of the delivered event.
    pub event_id: EventId,
}

/// Handler that records every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingHandler {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries observed so far, in arrival order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of deliveries observed so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, _ctx: &Context, event: &SharedEvent) -> HandlerResult {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Delivery {
                event_name: event.name().to_string(),
                event_id: event.id(),
            });
        Ok(())
    }
}

/// Handler that always fails with a fixed message.
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: &'static str,
    calls: Arc<AtomicUsize>,
}

impl FailingHandler {
    /// Fail every invocation with `message`.
    #[must_use]
    pub fn new(message: &'static str) -> Self {
        Self {
            message,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _ctx: &Context, _event: &SharedEvent) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Box::new(io::Error::other(self.message)))
    }
}

/// Handler that panics with a fixed message.
#[derive(Debug, Clone, Copy)]
pub struct PanickingHandler {
    message: &'static str,
}

impl PanickingHandler {
    /// Panic on every invocation with `message`.
    #[must_use]
    pub const fn new(message: &'static str) -> Self {
        Self { message }
    }
}

#[async_trait]
impl Handler for PanickingHandler {
    async fn handle(&self, _ctx: &Context, _event: &SharedEvent) -> HandlerResult {
        panic!("{}", self.message)
    }
}

/// Handler that sleeps before counting its completion.
#[derive(Debug, Clone)]
pub struct SlowHandler {
    delay: Duration,
    completed: Arc<AtomicUsize>,
}

impl SlowHandler {
    /// Sleep for `delay` on every invocation.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of invocations that ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for SlowHandler {
    async fn handle(&self, _ctx: &Context, _event: &SharedEvent) -> HandlerResult {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that parks until the test releases it.
///
/// Every invocation consumes one permit; [`BlockingHandler::release`] hands out
/// permits and [`BlockingHandler::wait_started`] waits for invocations to begin.
#[derive(Debug, Clone)]
pub struct BlockingHandler {
    gate: Arc<Semaphore>,
    started: Arc<AtomicUsize>,
    started_signal: Arc<Notify>,
    finished: Arc<AtomicUsize>,
}

impl Default for BlockingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingHandler {
    /// Handler with a closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
            started_signal: Arc::new(Notify::new()),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let `invocations` parked or future invocations proceed.
    pub fn release(&self, invocations: usize) {
        self.gate.add_permits(invocations);
    }

    /// Wait until at least `count` invocations have started.
    pub async fn wait_started(&self, count: usize) {
        loop {
            let notified = self.started_signal.notified();
            if self.started.load(Ordering::SeqCst) >= count {
                return;
            }
            notified.await;
        }
    }

    /// Number of invocations that have started.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of invocations that passed the gate and returned.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for BlockingHandler {
    async fn handle(&self, _ctx: &Context, _event: &SharedEvent) -> HandlerResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.started_signal.notify_waiters();
        let permit = self.gate.acquire().await?;
        permit.forget();
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
