//! # Design
//!
//! - Collector failures name the bus metric family they belong to, so a broken
//!   registration points at one collector instead of the whole registry.
//! - Messages stay constant apart from that family name; sources are preserved.

use thiserror::Error;

use crate::metrics::MetricFamily;

/// Result alias for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors raised while wiring logging and bus metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The global tracing subscriber was already installed or could not be set.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A bus collector could not be constructed from its options.
    #[error("invalid {family} collector")]
    Collector {
        /// Metric family whose collector failed.
        family: MetricFamily,
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// A bus collector was rejected by the registry.
    #[error("{family} collector rejected by registry")]
    Register {
        /// Metric family whose registration failed.
        family: MetricFamily,
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// Gathered bus metrics could not be written in the text format.
    #[error("failed to encode bus metrics")]
    Encode {
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// The text exposition output was not UTF-8.
    #[error("bus metrics output was not valid utf-8")]
    Utf8 {
        /// Underlying conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    /// Metric family involved in the failure, when there is one.
    #[must_use]
    pub const fn family(&self) -> Option<MetricFamily> {
        match self {
            Self::Collector { family, .. } | Self::Register { family, .. } => Some(*family),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn collector_errors_name_their_family() {
        let err = TelemetryError::Register {
            family: MetricFamily::HandlerInvocations,
            source: prometheus::Error::AlreadyReg,
        };
        assert_eq!(
            err.to_string(),
            "event_handler_invocations_total collector rejected by registry"
        );
        assert_eq!(err.family(), Some(MetricFamily::HandlerInvocations));
        assert!(err.source().is_some());

        let err = TelemetryError::Collector {
            family: MetricFamily::HandlerDuration,
            source: prometheus::Error::Msg("bad buckets".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "invalid event_handler_duration_seconds collector"
        );
    }

    #[test]
    fn rendering_errors_carry_no_family() {
        let utf8 = String::from_utf8(vec![0, 159]).expect_err("invalid utf-8");
        let err = TelemetryError::Utf8 { source: utf8 };
        assert_eq!(err.family(), None);
        assert_eq!(err.to_string(), "bus metrics output was not valid utf-8");
        assert!(err.source().is_some());
    }
}
