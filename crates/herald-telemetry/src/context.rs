//! Span helpers tying log output to the application and to published events.
//!
//! # Design
//! - An application-level span carries mode and build SHA for the life of the process.
//! - Publish spans carry the event name and id so handler logs nest under them.

use herald_events::Event;
use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the application-level tracing span for the lifetime of the guard.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("app", mode = %mode, build_sha = %build_sha()),
        ));
        Self {
            _guard: span.enter(),
        }
    }
}

/// Span covering the publish of `event`.
#[must_use]
pub fn publish_span(event: &dyn Event) -> Span {
    tracing::info_span!(
        "publish",
        event_name = %event.name(),
        event_id = %event.id(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_events::JsonEvent;
    use herald_test_support::logs::LogCapture;

    #[test]
    fn logs_inside_the_guard_carry_mode_and_build() {
        let capture = LogCapture::new();
        let _default = capture.install();
        {
            let _guard = GlobalContextGuard::new("demo");
            tracing::info!("bus ready");
        }
        tracing::info!("bus gone");

        let inside = capture.lines_containing("bus ready");
        assert_eq!(inside.len(), 1);
        assert!(inside[0].contains("app{mode=demo"));
        assert!(inside[0].contains("build_sha="));
        let outside = capture.lines_containing("bus gone");
        assert!(!outside[0].contains("mode=demo"));
    }

    #[test]
    fn publish_span_prefixes_nested_logs() {
        let capture = LogCapture::new();
        let _default = capture.install();
        let event = JsonEvent::new("doc.uploaded");
        let span = publish_span(&event);
        span.in_scope(|| tracing::info!("inside publish"));

        let lines = capture.lines_containing("inside publish");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("event_name=doc.uploaded"));
    }
}
