//! Structured logging around handler invocations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::Middleware;
use crate::context::Context;
use crate::event::SharedEvent;
use crate::handler::{Handler, HandlerResult};

/// Logs a start record before the handler and an outcome record after it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware {
    slow_threshold: Option<Duration>,
}

impl LoggingMiddleware {
    /// Logging without a slow-handler threshold.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slow_threshold: None,
        }
    }

    /// Log successful invocations slower than `threshold` at `warn`.
    #[must_use]
    pub const fn with_slow_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.slow_threshold = threshold;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Logged {
            next,
            slow_threshold: self.slow_threshold,
        })
    }
}

struct Logged {
    next: Arc<dyn Handler>,
    slow_threshold: Option<Duration>,
}

#[async_trait]
impl Handler for Logged {
    async fn handle(&self, ctx: &Context, event: &SharedEvent) -> HandlerResult {
        info!(
            event_name = %event.name(),
            event_id = %event.id(),
            event_timestamp = %event.timestamp().to_rfc3339(),
            "event handler started"
        );

        let started = Instant::now();
        let result = self.next.handle(ctx, event).await;
        let elapsed = started.elapsed();
        let elapsed_ms = duration_to_ms(elapsed);

        match &result {
            Ok(()) => match self.slow_threshold {
                Some(threshold) if elapsed > threshold => warn!(
                    event_name = %event.name(),
                    event_id = %event.id(),
                    elapsed_ms,
                    threshold_ms = duration_to_ms(threshold),
                    "event handler succeeded slowly"
                ),
                _ => info!(
                    event_name = %event.name(),
                    event_id = %event.id(),
                    elapsed_ms,
                    "event handler succeeded"
                ),
            },
            Err(err) => error!(
                event_name = %event.name(),
                event_id = %event.id(),
                elapsed_ms,
                error = %err,
                "event handler failed"
            ),
        }

        result
    }
}

/// Convert a duration to milliseconds saturating at `u64::MAX`.
fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
