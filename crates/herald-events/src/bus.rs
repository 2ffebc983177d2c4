//! Subscriber registry and concurrent fan-out dispatch.
//!
//! # Design
//! - One reader/writer lock guards the registry and the closed flag; writers are
//!   subscribe, unsubscribe, and close, the publish snapshot is the only reader.
//! - Publish copies the handler list and releases the lock before any handler runs,
//!   so handlers may call back into the bus without deadlocking.
//! - Every snapshotted handler runs on its own task behind a freshly built middleware
//!   chain; publish joins all of them and aggregates the failures.
//! - Task handles abort on drop, so cancelling a publish future cancels its handlers.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{
    BoxError, BusError, BusResult, DispatchError, HandlerFailure, PanicError, panic_message,
};
use crate::event::{Event, MetadataSummary, SharedEvent};
use crate::handler::{Handler, HandlerResult, handler_fn};
use crate::middleware::{
    DEFAULT_METADATA_KEY_LIMIT, LoggingMiddleware, MetricsMiddleware, MetricsSink,
    MiddlewareChain, NoopMetrics, RecoveryMiddleware,
};

/// Token identifying one subscription; required to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Raw sequence number backing the token.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "sub-{}", self.0)
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
struct Registry {
    closed: bool,
    subscribers: HashMap<String, Vec<Subscription>>,
}

struct BusInner {
    registry: RwLock<Registry>,
    chain: MiddlewareChain,
    metrics: Arc<dyn MetricsSink>,
    next_id: AtomicU64,
    metadata_key_limit: usize,
}

/// Shared in-process event bus. Clones refer to the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Bus with the default recovery, logging, and metrics stack and a no-op sink.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Bus that wraps every handler in `chain`.
    #[must_use]
    pub fn with_middleware(chain: MiddlewareChain) -> Self {
        Self::builder().middleware(chain).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// Register `handler` for events named `event_name`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] after [`EventBus::close`] and
    /// [`BusError::EmptyEventName`] for an empty name.
    pub fn subscribe<H>(&self, event_name: impl Into<String>, handler: H) -> BusResult<SubscriptionId>
    where
        H: Handler + 'static,
    {
        self.subscribe_shared(event_name, Arc::new(handler))
    }

    /// Register an already shared handler. Registering the same handler twice
    /// yields two independent subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] after [`EventBus::close`] and
    /// [`BusError::EmptyEventName`] for an empty name.
    pub fn subscribe_shared(
        &self,
        event_name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> BusResult<SubscriptionId> {
        let event_name = event_name.into();
        if event_name.is_empty() {
            return Err(BusError::EmptyEventName);
        }

        let mut registry = self.write_registry();
        if registry.closed {
            return Err(BusError::Closed {
                operation: "subscribe",
            });
        }

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let bucket = registry.subscribers.entry(event_name.clone()).or_default();
        bucket.push(Subscription { id, handler });
        debug!(
            event_name = %event_name,
            subscription = %id,
            subscribers = bucket.len(),
            "subscription added"
        );
        Ok(id)
    }

    /// Register an async closure; see [`handler_fn`].
    ///
    /// # Errors
    ///
    /// Same as [`EventBus::subscribe`].
    pub fn subscribe_fn<F, Fut>(
        &self,
        event_name: impl Into<String>,
        f: F,
    ) -> BusResult<SubscriptionId>
    where
        F: Fn(Context, SharedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(event_name, handler_fn(f))
    }

    /// Remove the subscription identified by `id` from `event_name`.
    ///
    /// Returns `Ok(false)` when no such subscription exists; an unknown token is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the signature aligned with the
    /// other registry operations.
    pub fn unsubscribe(&self, event_name: &str, id: SubscriptionId) -> BusResult<bool> {
        let mut registry = self.write_registry();
        let Some(bucket) = registry.subscribers.get_mut(event_name) else {
            return Ok(false);
        };
        let Some(position) = bucket.iter().position(|subscription| subscription.id == id) else {
            return Ok(false);
        };

        bucket.remove(position);
        if bucket.is_empty() {
            registry.subscribers.remove(event_name);
        }
        debug!(event_name = %event_name, subscription = %id, "subscription removed");
        Ok(true)
    }

    /// Dispatch `event` to every handler subscribed to its name and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] after [`EventBus::close`], or
    /// [`BusError::Dispatch`] listing every handler that failed.
    pub async fn publish<E>(&self, ctx: &Context, event: E) -> BusResult<()>
    where
        E: Event,
    {
        self.publish_shared(ctx, Arc::new(event)).await
    }

    /// Dispatch an event that is already shared.
    ///
    /// # Errors
    ///
    /// Same as [`EventBus::publish`].
    pub async fn publish_shared(&self, ctx: &Context, event: SharedEvent) -> BusResult<()> {
        let snapshot = {
            let registry = self.read_registry();
            if registry.closed {
                return Err(BusError::Closed {
                    operation: "publish",
                });
            }
            registry
                .subscribers
                .get(event.name())
                .cloned()
                .unwrap_or_default()
        };

        self.inner
            .metrics
            .record_publish(event.name(), snapshot.len());
        if snapshot.is_empty() {
            debug!(event_name = %event.name(), event_id = %event.id(), "no subscribers for event");
            return Ok(());
        }

        debug!(
            event_name = %event.name(),
            event_id = %event.id(),
            subscribers = snapshot.len(),
            "dispatching event"
        );

        let mut labels = Vec::with_capacity(snapshot.len());
        let mut tasks = Vec::with_capacity(snapshot.len());
        for (position, subscription) in snapshot.into_iter().enumerate() {
            labels.push((position, subscription.id));
            let chain = self.inner.chain.clone();
            let ctx = ctx.clone();
            let event = Arc::clone(&event);
            tasks.push(AbortOnDropHandle::new(tokio::spawn(async move {
                let handler = chain.wrap(subscription.handler);
                handler.handle(&ctx, &event).await
            })));
        }

        let outcomes = join_all(tasks).await;
        let failures: Vec<HandlerFailure> = labels
            .into_iter()
            .zip(outcomes)
            .filter_map(|((position, subscription), outcome)| {
                let source = match outcome {
                    Ok(Ok(())) => return None,
                    Ok(Err(err)) => err,
                    Err(join_error) => self.task_failure(&event, join_error),
                };
                Some(HandlerFailure::new(
                    event.name().to_string(),
                    subscription,
                    position,
                    source,
                ))
            })
            .collect();

        if failures.is_empty() {
            return Ok(());
        }

        warn!(
            event_name = %event.name(),
            event_id = %event.id(),
            failed = failures.len(),
            "event dispatch completed with handler failures"
        );
        Err(DispatchError::new(event.name().to_string(), event.id(), failures).into())
    }

    /// Reject further work and drop every subscription. Calling it again is a no-op.
    ///
    /// In-flight publishes that already took their snapshot run to completion.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for parity with shutdown hooks.
    pub fn close(&self) -> BusResult<()> {
        let mut registry = self.write_registry();
        if registry.closed {
            return Ok(());
        }
        let dropped: usize = registry.subscribers.values().map(Vec::len).sum();
        registry.closed = true;
        registry.subscribers.clear();
        info!(dropped_subscriptions = dropped, "event bus closed");
        Ok(())
    }

    /// Number of handlers currently subscribed to `event_name`.
    #[must_use]
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.read_registry()
            .subscribers
            .get(event_name)
            .map_or(0, Vec::len)
    }

    /// Event names with at least one subscriber, sorted.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_registry().subscribers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns `true` once [`EventBus::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.read_registry().closed
    }

    /// Middleware applied around every handler.
    #[must_use]
    pub fn middleware(&self) -> &MiddlewareChain {
        &self.inner.chain
    }

    fn task_failure(&self, event: &SharedEvent, join_error: JoinError) -> BoxError {
        if join_error.is_panic() {
            let payload = join_error.into_panic();
            return Box::new(PanicError::new(
                panic_message(payload.as_ref()),
                std::backtrace::Backtrace::disabled(),
                MetadataSummary::capture(event.metadata(), self.inner.metadata_key_limit),
            ));
        }
        Box::new(join_error)
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let registry = self.read_registry();
        formatter
            .debug_struct("EventBus")
            .field("closed", &registry.closed)
            .field("events", &registry.subscribers.len())
            .field("middleware", &self.inner.chain)
            .finish()
    }
}

/// Builder for [`EventBus`].
#[derive(Default)]
pub struct EventBusBuilder {
    middleware: Option<MiddlewareChain>,
    metrics: Option<Arc<dyn MetricsSink>>,
    metadata_key_limit: Option<usize>,
    slow_handler_threshold: Option<Duration>,
}

impl EventBusBuilder {
    /// Replace the default middleware stack with `chain`.
    #[must_use]
    pub fn middleware(mut self, chain: MiddlewareChain) -> Self {
        self.middleware = Some(chain);
        self
    }

    /// Report publish volume and, for the default stack, handler timings to `sink`.
    #[must_use]
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Cap the metadata keys captured when a handler panics.
    #[must_use]
    pub const fn metadata_key_limit(mut self, limit: usize) -> Self {
        self.metadata_key_limit = Some(limit);
        self
    }

    /// Log successful handlers slower than `threshold` at `warn` (default stack only).
    #[must_use]
    pub const fn slow_handler_threshold(mut self, threshold: Duration) -> Self {
        self.slow_handler_threshold = Some(threshold);
        self
    }

    /// Finish configuration.
    #[must_use]
    pub fn build(self) -> EventBus {
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(NoopMetrics) as Arc<dyn MetricsSink>);
        let metadata_key_limit = self
            .metadata_key_limit
            .unwrap_or(DEFAULT_METADATA_KEY_LIMIT);
        let chain = self.middleware.unwrap_or_else(|| {
            MiddlewareChain::empty()
                .with(RecoveryMiddleware::new().with_metadata_key_limit(metadata_key_limit))
                .with(LoggingMiddleware::new().with_slow_threshold(self.slow_handler_threshold))
                .with(MetricsMiddleware::new(Arc::clone(&metrics)))
        });

        EventBus {
            inner: Arc::new(BusInner {
                registry: RwLock::new(Registry::default()),
                chain,
                metrics,
                next_id: AtomicU64::new(1),
                metadata_key_limit,
            }),
        }
    }
}

impl fmt::Debug for EventBusBuilder {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EventBusBuilder")
            .field("middleware", &self.middleware)
            .field("metadata_key_limit", &self.metadata_key_limit)
            .field("slow_handler_threshold", &self.slow_handler_threshold)
            .finish_non_exhaustive()
    }
}
