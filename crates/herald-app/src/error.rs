//! # Design
//!
//! - Centralize application-level errors for bootstrap and the sample pipeline.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: herald_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: herald_telemetry::TelemetryError,
    },
    /// Event bus operations failed.
    #[error("event bus operation failed")]
    Bus {
        /// Operation identifier.
        operation: &'static str,
        /// Source bus error.
        source: herald_events::BusError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: herald_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: herald_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn bus(operation: &'static str, source: herald_events::BusError) -> Self {
        Self::Bus { operation, source }
    }
}
