//! Settings loading from JSON documents and environment overrides.
//!
//! # Design
//! - Layering: defaults, then the optional JSON file named by `HERALD_CONFIG`,
//!   then individual `HERALD_*` variables, then validation.
//! - Environment access goes through a caller-supplied lookup so tests never
//!   mutate the process environment.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{LogFormatSetting, Settings};
use crate::validate::{
    parse_bool, parse_number, validate_metadata_key_limit, validate_settings,
    validate_slow_handler_ms,
};

/// Names the optional JSON settings file.
pub const CONFIG_PATH_ENV: &str = "HERALD_CONFIG";
/// Comma-separated middleware names, outermost first.
pub const MIDDLEWARE_ENV: &str = "HERALD_MIDDLEWARE";
/// Metadata keys captured in panic reports.
pub const METADATA_KEY_LIMIT_ENV: &str = "HERALD_METADATA_KEY_LIMIT";
/// Slow-handler threshold in milliseconds.
pub const SLOW_HANDLER_MS_ENV: &str = "HERALD_SLOW_HANDLER_MS";
/// Log level directive.
pub const LOG_LEVEL_ENV: &str = "HERALD_LOG_LEVEL";
/// Log output format (`json` or `pretty`).
pub const LOG_FORMAT_ENV: &str = "HERALD_LOG_FORMAT";
/// Whether the Prometheus sink is attached.
pub const METRICS_ENABLED_ENV: &str = "HERALD_METRICS_ENABLED";

impl Settings {
    /// Parse a JSON settings document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document does not match the schema.
    pub fn from_json_str(document: &str) -> ConfigResult<Self> {
        serde_json::from_str(document).map_err(|source| ConfigError::Parse { path: None, source })
    }

    /// Read and parse a JSON settings file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::Parse`] when its contents do not match the schema.
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let document = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&document).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }

    /// Apply `HERALD_*` overrides obtained through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when an override cannot be parsed.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(MIDDLEWARE_ENV) {
            self.bus.middleware = raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = lookup(METADATA_KEY_LIMIT_ENV) {
            let limit = parse_number("bus", "metadata_key_limit", &raw)?;
            validate_metadata_key_limit(limit)?;
            self.bus.metadata_key_limit = limit;
        }
        if let Some(raw) = lookup(SLOW_HANDLER_MS_ENV) {
            self.bus.slow_handler_threshold_ms = if raw.trim().is_empty() {
                None
            } else {
                let threshold = parse_number("bus", "slow_handler_threshold_ms", &raw)?;
                validate_slow_handler_ms(threshold)?;
                Some(threshold)
            };
        }
        if let Some(raw) = lookup(LOG_LEVEL_ENV) {
            self.telemetry.log_level = raw.trim().to_string();
        }
        if let Some(raw) = lookup(LOG_FORMAT_ENV) {
            let format = LogFormatSetting::from_name(&raw).ok_or_else(|| {
                ConfigError::invalid("telemetry", "log_format", Some(raw.clone()), "unknown_format")
            })?;
            self.telemetry.log_format = Some(format);
        }
        if let Some(raw) = lookup(METRICS_ENABLED_ENV) {
            self.telemetry.metrics_enabled = parse_bool("telemetry", "metrics_enabled", &raw)?;
        }
        Ok(())
    }

    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Settings::load_with`].
    pub fn load() -> ConfigResult<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load defaults, the optional file named by `HERALD_CONFIG`, and
    /// environment overrides, then validate the result.
    ///
    /// # Errors
    ///
    /// Returns the first IO, parse, or validation failure.
    pub fn load_with<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match lookup(CONFIG_PATH_ENV).filter(|path| !path.trim().is_empty()) {
            Some(path) => {
                info!(path = %path, "loading settings file");
                Self::from_json_file(Path::new(&path))?
            }
            None => {
                debug!("no settings file configured; using defaults");
                Self::default()
            }
        };
        settings.apply_env(&lookup)?;
        validate_settings(&settings)?;
        Ok(settings)
    }
}
