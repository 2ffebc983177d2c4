//! Typed settings for the event bus and its telemetry.
//!
//! # Design
//! - Documents deserialize with defaults for every missing field and reject
//!   unknown fields so typos surface instead of silently falling back.
//! - Middleware stays a list of names until validation turns it into
//!   [`MiddlewareKind`] values, so unknown or repeated names get a precise error.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Bus construction settings.
    pub bus: BusSettings,
    /// Logging and metrics settings.
    pub telemetry: TelemetrySettings,
}

/// Settings that shape the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusSettings {
    /// Middleware names, outermost first.
    pub middleware: Vec<String>,
    /// Metadata keys captured when a handler panics.
    pub metadata_key_limit: usize,
    /// Successful handlers slower than this are logged at `warn`.
    pub slow_handler_threshold_ms: Option<u64>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            middleware: defaults::middleware(),
            metadata_key_limit: defaults::metadata_key_limit(),
            slow_handler_threshold_ms: None,
        }
    }
}

impl BusSettings {
    /// Slow-handler threshold as a duration.
    #[must_use]
    pub fn slow_handler_threshold(&self) -> Option<Duration> {
        self.slow_handler_threshold_ms.map(Duration::from_millis)
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySettings {
    /// Level directive handed to the log filter.
    pub log_level: String,
    /// Output format; inferred from the build profile when absent.
    pub log_format: Option<LogFormatSetting>,
    /// Whether the Prometheus sink is attached to the bus.
    pub metrics_enabled: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            log_format: None,
            metrics_enabled: defaults::metrics_enabled(),
        }
    }
}

/// Configured log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

impl LogFormatSetting {
    /// Parse a format name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Middleware layers the bus knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiddlewareKind {
    /// Panic recovery.
    Recovery,
    /// Structured handler logging.
    Logging,
    /// Handler timing reported to the metrics sink.
    Metrics,
}

impl MiddlewareKind {
    /// Configuration name of the layer.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::Logging => "logging",
            Self::Metrics => "metrics",
        }
    }

    /// Parse a configured name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "recovery" => Some(Self::Recovery),
            "logging" => Some(Self::Logging),
            "metrics" => Some(Self::Metrics),
            _ => None,
        }
    }
}
