//! Application bootstrap: settings, logging, bus construction, and the sample run.

use std::sync::Arc;

use herald_config::{LogFormatSetting, MiddlewareKind, Settings, parse_middleware};
use herald_events::{
    Context, EventBus, LoggingMiddleware, MetricsMiddleware, MetricsSink, Middleware,
    MiddlewareChain, NoopMetrics, RecoveryMiddleware,
};
use herald_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, publish_span};
use tracing::{Instrument, debug, info, warn};

use crate::consumers::{VectorIndex, register_pipeline};
use crate::error::{AppError, AppResult};
use crate::payloads::DocumentUploaded;

/// Dependencies required to bootstrap the application.
pub(crate) struct BootstrapDependencies {
    settings: Settings,
    metrics: Option<Metrics>,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) fn from_env() -> AppResult<Self> {
        let settings =
            Settings::load().map_err(|err| AppError::config("settings.load", err))?;
        Self::from_settings(settings)
    }

    pub(crate) fn from_settings(settings: Settings) -> AppResult<Self> {
        let metrics = if settings.telemetry.metrics_enabled {
            Some(Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?)
        } else {
            None
        };
        Ok(Self { settings, metrics })
    }
}

/// Translate bus settings into a configured [`EventBus`].
///
/// # Errors
///
/// Returns an error when the middleware list names unknown or repeated layers.
pub fn build_bus(settings: &Settings, metrics: Option<Metrics>) -> AppResult<EventBus> {
    let sink: Arc<dyn MetricsSink> = match metrics {
        Some(metrics) => Arc::new(metrics),
        None => Arc::new(NoopMetrics),
    };
    let limit = settings.bus.metadata_key_limit;
    let layers = parse_middleware(&settings.bus.middleware)
        .map_err(|err| AppError::config("bus.middleware", err))?;

    let mut chain = MiddlewareChain::empty();
    for layer in layers {
        let middleware: Arc<dyn Middleware> = match layer {
            MiddlewareKind::Recovery => {
                Arc::new(RecoveryMiddleware::new().with_metadata_key_limit(limit))
            }
            MiddlewareKind::Logging => Arc::new(
                LoggingMiddleware::new().with_slow_threshold(settings.bus.slow_handler_threshold()),
            ),
            MiddlewareKind::Metrics => Arc::new(MetricsMiddleware::new(Arc::clone(&sink))),
        };
        chain.push(middleware);
    }
    debug!(middleware = ?chain, "event bus middleware configured");

    Ok(EventBus::builder()
        .metrics(sink)
        .metadata_key_limit(limit)
        .middleware(chain)
        .build())
}

/// Entry point for the application boot sequence.
///
/// # Errors
///
/// Returns an error if settings, logging, or bus construction fail.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    run_app_with(dependencies).await
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let BootstrapDependencies { settings, metrics } = dependencies;

    let format = settings
        .telemetry
        .log_format
        .map_or_else(LogFormat::infer, log_format);
    let logging = LoggingConfig {
        level: &settings.telemetry.log_level,
        format,
        build_sha: option_env!("HERALD_BUILD_SHA").unwrap_or("dev"),
    };
    herald_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("demo");

    info!("herald bootstrap starting");
    let bus = build_bus(&settings, metrics.clone())?;
    let index = VectorIndex::new();
    register_pipeline(&bus, &index)?;

    let processed = publish_samples(&bus).await;
    info!(
        processed,
        indexed = index.len(),
        subscribers = ?bus.event_names(),
        "sample documents published"
    );

    if let Some(metrics) = metrics {
        match metrics.render() {
            Ok(rendered) => debug!(metrics = %rendered, "metrics snapshot"),
            Err(err) => warn!(error = %err, "metrics rendering failed"),
        }
    }

    bus.close().map_err(|err| AppError::bus("bus.close", err))?;
    info!("herald shutdown complete");
    Ok(())
}

/// Publish the sample uploads, logging rather than propagating dispatch failures.
async fn publish_samples(bus: &EventBus) -> usize {
    let samples = [
        DocumentUploaded::new("doc-001", "acme", "Quarterly revenue grew eleven percent."),
        DocumentUploaded::new("doc-002", "acme", "Meeting notes: ship the event bus."),
        DocumentUploaded::new("doc-003", "globex", "   "),
    ];

    let ctx = Context::new();
    let mut delivered = 0;
    for upload in samples {
        let span = publish_span(&upload);
        match bus.publish(&ctx, upload).instrument(span).await {
            Ok(()) => delivered += 1,
            Err(err) => warn!(error = %err, "document processing reported failures"),
        }
    }
    delivered
}

const fn log_format(setting: LogFormatSetting) -> LogFormat {
    match setting {
        LogFormatSetting::Json => LogFormat::Json,
        LogFormatSetting::Pretty => LogFormat::Pretty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_events::BusError;

    fn settings_with(middleware: &[&str]) -> Settings {
        let mut settings = Settings::default();
        settings.bus.middleware = middleware.iter().map(ToString::to_string).collect();
        settings
    }

    #[test]
    fn bus_follows_configured_middleware_order() -> AppResult<()> {
        let bus = build_bus(&settings_with(&["recovery", "metrics"]), None)?;
        assert_eq!(bus.middleware().names(), vec!["recovery", "metrics"]);

        let bare = build_bus(&settings_with(&[]), None)?;
        assert!(bare.middleware().is_empty());
        Ok(())
    }

    #[test]
    fn unknown_middleware_is_a_config_error() {
        let err = build_bus(&settings_with(&["recovery", "audit"]), None)
            .expect_err("unknown middleware");
        assert!(matches!(
            err,
            AppError::Config {
                operation: "bus.middleware",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn samples_report_partial_failure() -> AppResult<()> {
        let bus = build_bus(&Settings::default(), None)?;
        let index = VectorIndex::new();
        register_pipeline(&bus, &index)?;

        let delivered = publish_samples(&bus).await;
        assert_eq!(delivered, 2);
        assert_eq!(index.len(), 2);
        bus.close().map_err(|err| AppError::bus("bus.close", err))?;
        assert!(matches!(
            register_pipeline(&bus, &index),
            Err(AppError::Bus {
                source: BusError::Closed { .. },
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn metrics_are_optional() -> AppResult<()> {
        let mut settings = Settings::default();
        settings.telemetry.metrics_enabled = false;
        let dependencies = BootstrapDependencies::from_settings(settings)?;
        assert!(dependencies.metrics.is_none());
        assert_eq!(log_format(LogFormatSetting::Json), LogFormat::Json);
        Ok(())
    }
}
