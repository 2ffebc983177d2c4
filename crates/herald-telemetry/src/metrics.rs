//! Prometheus-backed metrics registry for the event bus.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Implements the bus `MetricsSink` seam so the default middleware stack and
//!   publish path report straight into Prometheus collectors.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use herald_events::{HandlerOutcome, MetricsSink};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Histogram buckets (seconds) for handler durations.
const HANDLER_DURATION_BUCKETS: &[f64] = &[
    0.000_5, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Metric families exported for the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricFamily {
    /// Publishes per event name.
    EventsPublished,
    /// Handler invocations per event name and outcome.
    HandlerInvocations,
    /// Handler latency histogram per event name.
    HandlerDuration,
    /// Failed handler invocations across all events.
    HandlerFailures,
    /// Subscribers reached by the latest publish.
    LastFanout,
}

impl MetricFamily {
    /// Exposition name of the family.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EventsPublished => "events_published_total",
            Self::HandlerInvocations => "event_handler_invocations_total",
            Self::HandlerDuration => "event_handler_duration_seconds",
            Self::HandlerFailures => "event_handler_failures_total",
            Self::LastFanout => "event_last_fanout_subscribers",
        }
    }

    const fn help(self) -> &'static str {
        match self {
            Self::EventsPublished => "Events published by name",
            Self::HandlerInvocations => "Handler invocations by event name and outcome",
            Self::HandlerDuration => "Handler invocation latency in seconds",
            Self::HandlerFailures => "Failed handler invocations across all events",
            Self::LastFanout => "Subscribers reached by the most recent publish",
        }
    }

    fn opts(self) -> Opts {
        Opts::new(self.name(), self.help())
    }
}

impl Display for MetricFamily {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Prometheus-backed metrics registry shared across the application.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    events_published_total: IntCounterVec,
    handler_invocations_total: IntCounterVec,
    handler_duration_seconds: HistogramVec,
    handler_failures_total: IntCounter,
    last_fanout: IntGauge,
}

/// Snapshot of selected counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Subscribers reached by the most recent publish.
    pub last_fanout: i64,
    /// Handler invocations that failed, across all events.
    pub handler_failures_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the bus collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error naming the [`MetricFamily`] whose collector could not
    /// be built or registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let events_published_total =
            IntCounterVec::new(MetricFamily::EventsPublished.opts(), &["event"])
                .map_err(collector_error(MetricFamily::EventsPublished))?;
        let handler_invocations_total = IntCounterVec::new(
            MetricFamily::HandlerInvocations.opts(),
            &["event", "outcome"],
        )
        .map_err(collector_error(MetricFamily::HandlerInvocations))?;
        let handler_duration_seconds = HistogramVec::new(
            HistogramOpts::from(MetricFamily::HandlerDuration.opts())
                .buckets(HANDLER_DURATION_BUCKETS.to_vec()),
            &["event"],
        )
        .map_err(collector_error(MetricFamily::HandlerDuration))?;
        let handler_failures_total = IntCounter::with_opts(MetricFamily::HandlerFailures.opts())
            .map_err(collector_error(MetricFamily::HandlerFailures))?;
        let last_fanout = IntGauge::with_opts(MetricFamily::LastFanout.opts())
            .map_err(collector_error(MetricFamily::LastFanout))?;

        register(&registry, MetricFamily::EventsPublished, &events_published_total)?;
        register(
            &registry,
            MetricFamily::HandlerInvocations,
            &handler_invocations_total,
        )?;
        register(
            &registry,
            MetricFamily::HandlerDuration,
            &handler_duration_seconds,
        )?;
        register(&registry, MetricFamily::HandlerFailures, &handler_failures_total)?;
        register(&registry, MetricFamily::LastFanout, &last_fanout)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                events_published_total,
                handler_invocations_total,
                handler_duration_seconds,
                handler_failures_total,
                last_fanout,
            }),
        })
    }

    /// Count one publish of `event_name` reaching `subscribers` handlers.
    pub fn inc_published(&self, event_name: &str, subscribers: usize) {
        self.inner
            .events_published_total
            .with_label_values(&[event_name])
            .inc();
        self.inner
            .last_fanout
            .set(i64::try_from(subscribers).unwrap_or(i64::MAX));
    }

    /// Record one handler invocation.
    pub fn observe_handler(&self, event_name: &str, outcome: HandlerOutcome, elapsed: Duration) {
        self.inner
            .handler_invocations_total
            .with_label_values(&[event_name, outcome.as_str()])
            .inc();
        self.inner
            .handler_duration_seconds
            .with_label_values(&[event_name])
            .observe(elapsed.as_secs_f64());
        if outcome == HandlerOutcome::Failure {
            self.inner.handler_failures_total.inc();
        }
    }

    /// Publishes counted for `event_name`.
    #[must_use]
    pub fn published(&self, event_name: &str) -> u64 {
        self.inner
            .events_published_total
            .with_label_values(&[event_name])
            .get()
    }

    /// Invocations counted for `event_name` with `outcome`.
    #[must_use]
    pub fn invocations(&self, event_name: &str, outcome: HandlerOutcome) -> u64 {
        self.inner
            .handler_invocations_total
            .with_label_values(&[event_name, outcome.as_str()])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Encode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::Utf8 { source })
    }

    /// Take a point-in-time snapshot of the health-relevant collectors.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            last_fanout: self.inner.last_fanout.get(),
            handler_failures_total: self.inner.handler_failures_total.get(),
        }
    }
}

impl MetricsSink for Metrics {
    fn record_handler(&self, event_name: &str, outcome: HandlerOutcome, elapsed: Duration) {
        self.observe_handler(event_name, outcome, elapsed);
    }

    fn record_publish(&self, event_name: &str, subscribers: usize) {
        self.inc_published(event_name, subscribers);
    }
}

fn collector_error(family: MetricFamily) -> impl FnOnce(prometheus::Error) -> TelemetryError {
    move |source| TelemetryError::Collector { family, source }
}

fn register<C>(registry: &Registry, family: MetricFamily, collector: &C) -> TelemetryResult<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::Register { family, source })
}
