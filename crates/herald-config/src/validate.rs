//! Validation helpers and parsing utilities for settings values.

use std::collections::HashSet;

use tracing::warn;

use crate::defaults::{MAX_METADATA_KEY_LIMIT, MAX_SLOW_HANDLER_MS, MIN_METADATA_KEY_LIMIT};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{MiddlewareKind, Settings};

/// Check every field of `settings`.
///
/// A middleware list whose first entry is not `recovery` is accepted with a
/// warning: panics raised by the outer layers would then escape recovery.
///
/// # Errors
///
/// Returns the first invalid field, unknown middleware, or duplicate middleware.
pub fn validate_settings(settings: &Settings) -> ConfigResult<()> {
    let stack = parse_middleware(&settings.bus.middleware)?;
    match stack.first() {
        Some(MiddlewareKind::Recovery) => {}
        Some(_) if stack.contains(&MiddlewareKind::Recovery) => warn!(
            middleware = ?settings.bus.middleware,
            "recovery middleware is not outermost; panics in outer layers will not be recovered"
        ),
        _ => warn!(
            middleware = ?settings.bus.middleware,
            "recovery middleware is not configured; handler panics are reported without backtraces"
        ),
    }

    validate_metadata_key_limit(settings.bus.metadata_key_limit)?;
    if let Some(threshold) = settings.bus.slow_handler_threshold_ms {
        validate_slow_handler_ms(threshold)?;
    }
    if settings.telemetry.log_level.trim().is_empty() {
        return Err(ConfigError::invalid(
            "telemetry",
            "log_level",
            None,
            "empty",
        ));
    }
    Ok(())
}

/// Resolve middleware names into layers, preserving order.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownMiddleware`] or [`ConfigError::DuplicateMiddleware`].
pub fn parse_middleware(names: &[String]) -> ConfigResult<Vec<MiddlewareKind>> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .iter()
        .map(|name| {
            let kind = MiddlewareKind::from_name(name)
                .ok_or_else(|| ConfigError::UnknownMiddleware { name: name.clone() })?;
            if !seen.insert(kind) {
                return Err(ConfigError::DuplicateMiddleware { name: name.clone() });
            }
            Ok(kind)
        })
        .collect()
}

pub(crate) fn validate_metadata_key_limit(limit: usize) -> ConfigResult<()> {
    if (MIN_METADATA_KEY_LIMIT..=MAX_METADATA_KEY_LIMIT).contains(&limit) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "bus",
            "metadata_key_limit",
            Some(limit.to_string()),
            "out_of_range",
        ))
    }
}

pub(crate) fn validate_slow_handler_ms(threshold: u64) -> ConfigResult<()> {
    if threshold == 0 || threshold > MAX_SLOW_HANDLER_MS {
        return Err(ConfigError::invalid(
            "bus",
            "slow_handler_threshold_ms",
            Some(threshold.to_string()),
            "out_of_range",
        ));
    }
    Ok(())
}

pub(crate) fn parse_bool(
    section: &'static str,
    field: &'static str,
    raw: &str,
) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            section,
            field,
            Some(raw.to_string()),
            "not_a_boolean",
        )),
    }
}

pub(crate) fn parse_number<T: std::str::FromStr>(
    section: &'static str,
    field: &'static str,
    raw: &str,
) -> ConfigResult<T> {
    raw.trim().parse::<T>().map_err(|_| {
        ConfigError::invalid(section, field, Some(raw.to_string()), "not_a_number")
    })
}
