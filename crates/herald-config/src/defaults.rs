//! Default values and bounds for bus and telemetry settings.
//!
//! # Design
//! - Keep every default and limit in one place so serde defaults, validation,
//!   and documentation agree.

/// Middleware applied when configuration does not list any, outermost first.
pub const DEFAULT_MIDDLEWARE: [&str; 3] = ["recovery", "logging", "metrics"];
/// Metadata keys captured in panic reports by default.
pub const DEFAULT_METADATA_KEY_LIMIT: usize = 16;
/// Smallest accepted metadata key limit.
pub const MIN_METADATA_KEY_LIMIT: usize = 1;
/// Largest accepted metadata key limit.
pub const MAX_METADATA_KEY_LIMIT: usize = 1_024;
/// Largest accepted slow-handler threshold (one hour).
pub const MAX_SLOW_HANDLER_MS: u64 = 3_600_000;
/// Log level used when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub(crate) fn middleware() -> Vec<String> {
    DEFAULT_MIDDLEWARE.iter().map(ToString::to_string).collect()
}

pub(crate) const fn metadata_key_limit() -> usize {
    DEFAULT_METADATA_KEY_LIMIT
}

pub(crate) fn log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

pub(crate) const fn metrics_enabled() -> bool {
    true
}
