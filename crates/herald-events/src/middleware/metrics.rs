//! Timing of handler invocations reported to a pluggable metrics sink.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::Middleware;
use crate::context::Context;
use crate::event::SharedEvent;
use crate::handler::{Handler, HandlerResult};

/// Outcome label recorded for a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerOutcome {
    /// The handler returned `Ok`.
    Success,
    /// The handler returned an error.
    Failure,
}

impl HandlerOutcome {
    /// Label value suitable for metrics backends.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Classify a handler result.
    #[must_use]
    pub const fn of(result: &HandlerResult) -> Self {
        if result.is_ok() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Destination for bus timing and volume measurements.
pub trait MetricsSink: Send + Sync {
    /// Record one handler invocation.
    fn record_handler(&self, event_name: &str, outcome: HandlerOutcome, elapsed: Duration);

    /// Record one publish and the number of subscribers it fanned out to.
    fn record_publish(&self, event_name: &str, subscribers: usize) {
        let _ = (event_name, subscribers);
    }
}

/// Sink that discards every measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_handler(&self, _event_name: &str, _outcome: HandlerOutcome, _elapsed: Duration) {}
}

/// Times the downstream handler and reports to a [`MetricsSink`].
#[derive(Clone)]
pub struct MetricsMiddleware {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsMiddleware {
    /// Report measurements to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }
}

impl fmt::Debug for MetricsMiddleware {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("MetricsMiddleware").finish_non_exhaustive()
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Timed {
            next,
            sink: Arc::clone(&self.sink),
        })
    }
}

struct Timed {
    next: Arc<dyn Handler>,
    sink: Arc<dyn MetricsSink>,
}

#[async_trait]
impl Handler for Timed {
    async fn handle(&self, ctx: &Context, event: &SharedEvent) -> HandlerResult {
        let started = Instant::now();
        let result = self.next.handle(ctx, event).await;
        self.sink
            .record_handler(event.name(), HandlerOutcome::of(&result), started.elapsed());
        result
    }
}
