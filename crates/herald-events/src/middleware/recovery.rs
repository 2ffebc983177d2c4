//! Panic recovery: converts a panicking handler into a returned error.
//!
//! # Design
//! - The wrapped future is polled inside `catch_unwind`; a panic becomes a
//!   [`PanicError`] instead of tearing down the dispatch task.
//! - A process-wide panic hook, chained in front of the previous one, records the
//!   panic location and a backtrace while the unwinding frames still exist. It
//!   only records on threads currently polling a recovery scope.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::poll_fn;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::error;

use super::Middleware;
use crate::context::Context;
use crate::error::{PanicError, PanicLocation, panic_message};
use crate::event::{MetadataSummary, SharedEvent};
use crate::handler::{Handler, HandlerResult};

/// Default number of metadata keys listed in a panic report.
pub const DEFAULT_METADATA_KEY_LIMIT: usize = 16;

static SITE_HOOK: Once = Once::new();

thread_local! {
    static RECOVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
    static PANIC_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

struct PanicSite {
    location: Option<PanicLocation>,
    backtrace: Backtrace,
}

fn install_site_hook() {
    SITE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if RECOVERY_DEPTH.with(Cell::get) > 0 {
                let site = PanicSite {
                    location: info.location().map(PanicLocation::from),
                    backtrace: Backtrace::force_capture(),
                };
                PANIC_SITE.with(|slot| {
                    if let Ok(mut slot) = slot.try_borrow_mut() {
                        *slot = Some(site);
                    }
                });
            }
            previous(info);
        }));
    });
}

fn take_panic_site() -> Option<PanicSite> {
    PANIC_SITE.with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
}

/// Marks the current thread as polling a recovered handler.
struct RecoveryScope;

impl RecoveryScope {
    fn enter() -> Self {
        RECOVERY_DEPTH.with(|depth| {
            if depth.get() == 0 {
                drop(take_panic_site());
            }
            depth.set(depth.get() + 1);
        });
        Self
    }
}

impl Drop for RecoveryScope {
    fn drop(&mut self) {
        RECOVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Outermost guard that keeps handler panics from escaping the dispatch task.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryMiddleware {
    metadata_key_limit: usize,
}

impl RecoveryMiddleware {
    /// Recovery with the default metadata key limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            metadata_key_limit: DEFAULT_METADATA_KEY_LIMIT,
        }
    }

    /// Cap the number of metadata keys captured in panic reports.
    #[must_use]
    pub const fn with_metadata_key_limit(mut self, limit: usize) -> Self {
        self.metadata_key_limit = limit;
        self
    }
}

impl Default for RecoveryMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for RecoveryMiddleware {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        install_site_hook();
        Arc::new(Recover {
            next,
            metadata_key_limit: self.metadata_key_limit,
        })
    }
}

struct Recover {
    next: Arc<dyn Handler>,
    metadata_key_limit: usize,
}

#[async_trait]
impl Handler for Recover {
    async fn handle(&self, ctx: &Context, event: &SharedEvent) -> HandlerResult {
        let mut handling = self.next.handle(ctx, event);
        let guarded = AssertUnwindSafe(poll_fn(move |cx| {
            let _scope = RecoveryScope::enter();
            handling.as_mut().poll(cx)
        }));
        match guarded.catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let site = take_panic_site();
                let (location, backtrace) = match site {
                    Some(site) => (site.location, site.backtrace),
                    None => (None, Backtrace::force_capture()),
                };
                let mut report = PanicError::new(
                    panic_message(payload.as_ref()),
                    backtrace,
                    MetadataSummary::capture(event.metadata(), self.metadata_key_limit),
                );
                if let Some(location) = location {
                    report = report.with_location(location);
                }
                error!(
                    event_name = %event.name(),
                    event_id = %event.id(),
                    panic = %report.message(),
                    location = ?report.location().map(ToString::to_string),
                    metadata = %report.metadata(),
                    "event handler panicked"
                );
                Err(Box::new(report))
            }
        }
    }
}
