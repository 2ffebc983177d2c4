#![forbid(unsafe_code)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Settings for the Herald event bus and its telemetry.
//!
//! Layout: `model.rs` (typed settings), `defaults.rs` (defaults and bounds),
//! `loader.rs` (JSON file and environment layering), `validate.rs` (validation
//! and scalar parsing), `error.rs`.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use defaults::{
    DEFAULT_LOG_LEVEL, DEFAULT_METADATA_KEY_LIMIT, DEFAULT_MIDDLEWARE, MAX_METADATA_KEY_LIMIT,
    MAX_SLOW_HANDLER_MS, MIN_METADATA_KEY_LIMIT,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{
    CONFIG_PATH_ENV, LOG_FORMAT_ENV, LOG_LEVEL_ENV, METADATA_KEY_LIMIT_ENV, METRICS_ENABLED_ENV,
    MIDDLEWARE_ENV, SLOW_HANDLER_MS_ENV,
};
pub use model::{BusSettings, LogFormatSetting, MiddlewareKind, Settings, TelemetrySettings};
pub use validate::{parse_middleware, validate_settings};
