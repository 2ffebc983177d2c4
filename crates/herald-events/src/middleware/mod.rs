//! Composable decorators applied around every handler invocation.
//!
//! # Design
//! - A middleware turns a downstream handler into a new handler that runs work
//!   before, after, or instead of it.
//! - Chains are folded from the innermost handler outward so the first configured
//!   middleware ends up outermost; recovery must sit there to also catch panics
//!   raised by the other wrappers.
//! - The bus rebuilds the chain for every dispatch so wrappers never share
//!   per-invocation state across concurrent handlers.

mod logging;
mod metrics;
mod recovery;

use std::fmt;
use std::sync::Arc;

use crate::handler::Handler;

pub use logging::LoggingMiddleware;
pub use metrics::{HandlerOutcome, MetricsMiddleware, MetricsSink, NoopMetrics};
pub use recovery::{DEFAULT_METADATA_KEY_LIMIT, RecoveryMiddleware};

/// Transformer from a downstream handler to a wrapped handler.
pub trait Middleware: Send + Sync {
    /// Short identifier used in diagnostics.
    fn name(&self) -> &'static str;

    /// Wrap `next`, returning the handler that should run in its place.
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

/// Middleware backed by a closure; see [`middleware_fn`].
pub struct MiddlewareFn<F> {
    name: &'static str,
    f: F,
}

/// Adapt a closure of shape `next -> handler` into a [`Middleware`].
pub const fn middleware_fn<F>(name: &'static str, f: F) -> MiddlewareFn<F>
where
    F: Fn(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + Sync,
{
    MiddlewareFn { name, f }
}

impl<F> Middleware for MiddlewareFn<F>
where
    F: Fn(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        (self.f)(next)
    }
}

impl<F> fmt::Debug for MiddlewareFn<F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MiddlewareFn")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered middleware list; the first entry is outermost.
#[derive(Clone)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Chain that invokes handlers unwrapped.
    #[must_use]
    pub const fn empty() -> Self {
        Self { layers: Vec::new() }
    }

    /// Recovery, logging, and metrics, outermost to innermost.
    #[must_use]
    pub fn default_stack(metrics: Arc<dyn MetricsSink>) -> Self {
        Self::empty()
            .with(RecoveryMiddleware::new())
            .with(LoggingMiddleware::new())
            .with(MetricsMiddleware::new(metrics))
    }

    /// Append `middleware` as the new innermost layer.
    #[must_use]
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware as the new innermost layer.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    /// Number of layers in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` when the chain has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names, outermost first.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Wrap `handler` in every layer so the first layer runs first.
    #[must_use]
    pub fn wrap(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self.layers
            .iter()
            .rev()
            .fold(handler, |next, layer| layer.wrap(next))
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::default_stack(Arc::new(NoopMetrics))
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.names()).finish()
    }
}
