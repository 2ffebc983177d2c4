//! Handler contract invoked by the bus for every matching event.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::BoxError;
use crate::event::SharedEvent;

/// Result returned by a handler invocation.
pub type HandlerResult = Result<(), BoxError>;

/// Subscriber callback. Any state it captures belongs to the registering module.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process `event`; returning an error marks this subscriber's delivery as failed.
    async fn handle(&self, ctx: &Context, event: &SharedEvent) -> HandlerResult;
}

/// Handler backed by an async closure; see [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Adapt an async closure into a [`Handler`].
///
/// The closure receives owned clones of the context and event so the returned
/// future can be `'static`.
pub const fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Context, SharedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Context, SharedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: &Context, event: &SharedEvent) -> HandlerResult {
        (self.f)(ctx.clone(), Arc::clone(event)).await
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::JsonEvent;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn handler_fn_forwards_context_and_event() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler = handler_fn(move |ctx: Context, event: SharedEvent| {
            let counter = Arc::clone(&counter);
            async move {
                assert!(!ctx.is_cancelled());
                assert_eq!(event.name(), "doc.uploaded");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let event: SharedEvent = Arc::new(JsonEvent::new("doc.uploaded"));
        handler
            .handle(&Context::new(), &event)
            .await
            .expect("handler succeeds");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_fn_propagates_errors() {
        let handler = handler_fn(|_ctx, _event| async {
            Err::<(), BoxError>(Box::new(io::Error::other("boom")))
        });
        let event: SharedEvent = Arc::new(JsonEvent::new("doc.uploaded"));
        let err = handler
            .handle(&Context::new(), &event)
            .await
            .expect_err("handler fails");
        assert_eq!(err.to_string(), "boom");
    }
}
