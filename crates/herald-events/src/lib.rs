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

//! In-process publish/subscribe event bus.
//!
//! Producers publish values implementing [`Event`]; every [`Handler`] subscribed
//! to the event's name runs concurrently behind a [`MiddlewareChain`], and
//! `publish` returns once all of them finished, reporting every failure in a
//! single [`DispatchError`].
//!
//! Layout: `event.rs` (event capability and metadata), `context.rs` (dispatch
//! context), `handler.rs` (handler contract), `middleware/` (chain plus the
//! recovery, logging, and metrics layers), `bus.rs` (registry and dispatch),
//! `error.rs` (error taxonomy).

pub mod bus;
pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod middleware;

pub use bus::{EventBus, EventBusBuilder, SubscriptionId};
pub use context::Context;
pub use error::{
    BoxError, BusError, BusResult, DispatchError, HandlerFailure, PanicError, PanicLocation,
};
pub use event::{
    Event, EventHeader, EventId, JsonEvent, METADATA_SIZE_BUDGET, Metadata, MetadataSummary,
    SharedEvent,
};
pub use handler::{Handler, HandlerFn, HandlerResult, handler_fn};
pub use middleware::{
    DEFAULT_METADATA_KEY_LIMIT, HandlerOutcome, LoggingMiddleware, MetricsMiddleware, MetricsSink,
    Middleware, MiddlewareChain, MiddlewareFn, NoopMetrics, RecoveryMiddleware, middleware_fn,
};
