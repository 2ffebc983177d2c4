use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use herald_events::{
    BoxError, BusError, Context, EventBus, Handler, HandlerOutcome, HandlerResult, MetricsSink,
    MiddlewareChain, PanicError, RecoveryMiddleware, SharedEvent, SubscriptionId, middleware_fn,
};
use herald_test_support::fixtures::{
    BlockingHandler, DOC_UPLOADED, FailingHandler, PanickingHandler, RecordingHandler,
    SlowHandler, bare_event, doc_uploaded,
};
use herald_test_support::logs::LogCapture;

#[tokio::test]
async fn publish_without_subscribers_succeeds() -> anyhow::Result<()> {
    let bus = EventBus::new();
    bus.publish(&Context::new(), doc_uploaded("doc-1")).await?;
    assert_eq!(bus.subscriber_count(DOC_UPLOADED), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_returns_after_every_handler_finished() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let slow = SlowHandler::new(Duration::from_millis(30));
    for _ in 0..5 {
        bus.subscribe(DOC_UPLOADED, slow.clone())?;
    }

    bus.publish(&Context::new(), doc_uploaded("doc-1")).await?;
    assert_eq!(slow.completed(), 5);
    Ok(())
}

#[tokio::test]
async fn failing_handlers_do_not_stop_their_siblings() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let recorder = RecordingHandler::new();
    let failing = FailingHandler::new("boom");
    let mut failing_ids = Vec::new();
    for index in 0..5 {
        if index % 2 == 0 {
            failing_ids.push(bus.subscribe(DOC_UPLOADED, failing.clone())?);
        } else {
            bus.subscribe(DOC_UPLOADED, recorder.clone())?;
        }
    }

    let err = bus
        .publish(&Context::new(), doc_uploaded("doc-1"))
        .await
        .expect_err("three handlers fail");
    let dispatch = err.as_dispatch().expect("dispatch error");

    assert_eq!(recorder.count(), 2);
    assert_eq!(failing.calls(), 3);
    assert_eq!(dispatch.failures().len(), 3);
    let reported: Vec<SubscriptionId> = dispatch
        .failures()
        .iter()
        .map(herald_events::HandlerFailure::subscription)
        .collect();
    assert_eq!(reported, failing_ids);
    let positions: Vec<usize> = dispatch
        .failures()
        .iter()
        .map(herald_events::HandlerFailure::position)
        .collect();
    assert_eq!(positions, vec![0, 2, 4]);
    Ok(())
}

#[tokio::test]
async fn panicking_handler_is_isolated_and_reported() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let recorder = RecordingHandler::new();
    bus.subscribe(DOC_UPLOADED, PanickingHandler::new("index out of range"))?;
    bus.subscribe(DOC_UPLOADED, recorder.clone())?;

    let err = bus
        .publish(&Context::new(), doc_uploaded("doc-1"))
        .await
        .expect_err("panic surfaces as error");

    assert_eq!(recorder.count(), 1);
    let dispatch = err.as_dispatch().expect("dispatch error");
    assert_eq!(dispatch.failures().len(), 1);
    let report: &PanicError = dispatch.failures()[0].panic().expect("panic report");
    assert_eq!(report.message(), "index out of range");
    assert!(report.metadata().keys.contains(&"tenant".to_string()));
    assert!(err.to_string().contains("index out of range"));
    Ok(())
}

#[tokio::test]
async fn document_scenario_reports_boom() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let embedder = RecordingHandler::new();
    bus.subscribe(DOC_UPLOADED, embedder.clone())?;
    bus.subscribe(DOC_UPLOADED, FailingHandler::new("boom"))?;

    let event = doc_uploaded("doc-42");
    let event_id = herald_events::Event::id(&event);
    let err = bus
        .publish(&Context::new(), event)
        .await
        .expect_err("one handler fails");

    assert_eq!(embedder.count(), 1);
    assert_eq!(embedder.deliveries()[0].event_id, event_id);
    let dispatch = err.as_dispatch().expect("dispatch error");
    assert_eq!(dispatch.event_name(), DOC_UPLOADED);
    assert_eq!(dispatch.event_id(), event_id);
    assert_eq!(dispatch.failures().len(), 1);
    assert_eq!(dispatch.failures()[0].error().to_string(), "boom");
    assert!(err.to_string().contains("boom"));
    assert!(err.to_string().contains(DOC_UPLOADED));
    Ok(())
}

#[tokio::test]
async fn closed_bus_rejects_work_and_reports_zero() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let recorder = RecordingHandler::new();
    bus.subscribe(DOC_UPLOADED, recorder.clone())?;
    bus.close()?;

    assert_eq!(bus.subscriber_count(DOC_UPLOADED), 0);
    assert!(bus.event_names().is_empty());

    let publish = bus
        .publish(&Context::new(), doc_uploaded("doc-1"))
        .await
        .expect_err("publish after close");
    assert!(matches!(
        publish,
        BusError::Closed {
            operation: "publish"
        }
    ));
    let subscribe = bus
        .subscribe(DOC_UPLOADED, recorder.clone())
        .expect_err("subscribe after close");
    assert!(matches!(
        subscribe,
        BusError::Closed {
            operation: "subscribe"
        }
    ));
    assert_eq!(subscribe.to_string(), "event bus is closed");
    assert_eq!(recorder.count(), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_unsubscribe_is_not_an_error() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let id = bus.subscribe(DOC_UPLOADED, RecordingHandler::new())?;
    assert!(!bus.unsubscribe("invoice.validated", id)?);
    assert!(bus.unsubscribe(DOC_UPLOADED, id)?);
    assert!(!bus.unsubscribe(DOC_UPLOADED, id)?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_subscribes_are_all_invoked() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let recorder = RecordingHandler::new();

    let mut joins = Vec::new();
    for _ in 0..100 {
        let bus = bus.clone();
        let recorder = recorder.clone();
        joins.push(tokio::spawn(
            async move { bus.subscribe(DOC_UPLOADED, recorder) },
        ));
    }
    let mut ids = Vec::new();
    for join in joins {
        ids.push(join.await??);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 100);
    assert_eq!(bus.subscriber_count(DOC_UPLOADED), 100);

    bus.publish(&Context::new(), doc_uploaded("doc-1")).await?;
    assert_eq!(recorder.count(), 100);
    Ok(())
}

#[tokio::test]
async fn handlers_may_call_back_into_the_bus() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let late = RecordingHandler::new();

    let registering_bus = bus.clone();
    let registered = late.clone();
    bus.subscribe_fn(DOC_UPLOADED, move |_ctx, _event| {
        let bus = registering_bus.clone();
        let late = registered.clone();
        async move {
            bus.subscribe(DOC_UPLOADED, late)?;
            assert!(bus.subscriber_count(DOC_UPLOADED) >= 2);
            Ok::<(), BoxError>(())
        }
    })?;

    bus.publish(&Context::new(), doc_uploaded("doc-1")).await?;
    assert_eq!(late.count(), 0, "in-flight publish uses its snapshot");
    assert_eq!(bus.subscriber_count(DOC_UPLOADED), 2);

    bus.publish(&Context::new(), doc_uploaded("doc-2")).await?;
    assert_eq!(late.count(), 1);
    Ok(())
}

#[tokio::test]
async fn close_lets_in_flight_publish_finish() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let blocking = BlockingHandler::new();
    bus.subscribe(DOC_UPLOADED, blocking.clone())?;

    let publisher = bus.clone();
    let in_flight = tokio::spawn(async move {
        publisher
            .publish(&Context::new(), doc_uploaded("doc-1"))
            .await
    });

    blocking.wait_started(1).await;
    bus.close()?;
    blocking.release(1);

    in_flight.await??;
    assert_eq!(blocking.finished(), 1);
    assert!(bus.is_closed());
    Ok(())
}

#[tokio::test]
async fn dropping_publish_aborts_handlers() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let blocking = BlockingHandler::new();
    bus.subscribe(DOC_UPLOADED, blocking.clone())?;

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        bus.publish(&Context::new(), doc_uploaded("doc-1")),
    )
    .await;
    assert!(outcome.is_err());

    blocking.release(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(blocking.started(), 1);
    assert_eq!(blocking.finished(), 0);
    Ok(())
}

#[tokio::test]
async fn context_reaches_handlers_unchanged() -> anyhow::Result<()> {
    let bus = EventBus::new();
    let observed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&observed);
    bus.subscribe_fn(DOC_UPLOADED, move |ctx: Context, _event| {
        let seen = Arc::clone(&seen);
        async move {
            if ctx.is_cancelled() && ctx.deadline().is_some() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    })?;

    let ctx = Context::new().with_timeout(Duration::from_secs(30));
    ctx.cancel();
    bus.publish(&ctx, doc_uploaded("doc-1")).await?;
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[derive(Default)]
struct CountingSink {
    publishes: Mutex<Vec<(String, usize)>>,
    handlers: Mutex<Vec<(String, HandlerOutcome)>>,
}

impl MetricsSink for CountingSink {
    fn record_handler(&self, event_name: &str, outcome: HandlerOutcome, _elapsed: Duration) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event_name.to_string(), outcome));
    }

    fn record_publish(&self, event_name: &str, subscribers: usize) {
        self.publishes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event_name.to_string(), subscribers));
    }
}

#[tokio::test]
async fn metrics_sink_sees_publishes_and_outcomes() -> anyhow::Result<()> {
    let sink = Arc::new(CountingSink::default());
    let bus = EventBus::builder().metrics(sink.clone()).build();
    bus.subscribe(DOC_UPLOADED, RecordingHandler::new())?;
    bus.subscribe(DOC_UPLOADED, FailingHandler::new("boom"))?;

    let _ = bus.publish(&Context::new(), doc_uploaded("doc-1")).await;
    bus.publish(&Context::new(), bare_event("nobody.listens"))
        .await?;

    let publishes = sink
        .publishes
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    assert_eq!(
        publishes,
        vec![
            (DOC_UPLOADED.to_string(), 2),
            ("nobody.listens".to_string(), 0)
        ]
    );

    let mut outcomes: Vec<HandlerOutcome> = sink
        .handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(_, outcome)| *outcome)
        .collect();
    outcomes.sort_by_key(|outcome| outcome.as_str());
    assert_eq!(
        outcomes,
        vec![HandlerOutcome::Failure, HandlerOutcome::Success]
    );
    Ok(())
}

#[tokio::test]
async fn panic_without_recovery_is_reported_without_backtrace() -> anyhow::Result<()> {
    let bus = EventBus::with_middleware(MiddlewareChain::empty());
    bus.subscribe(DOC_UPLOADED, PanickingHandler::new("raw panic"))?;

    let err = bus
        .publish(&Context::new(), doc_uploaded("doc-1"))
        .await
        .expect_err("panic reported");
    let failure = &err.as_dispatch().expect("dispatch error").failures()[0];
    let report = failure.panic().expect("panic report");
    assert_eq!(report.message(), "raw panic");
    assert_eq!(
        report.backtrace().status(),
        std::backtrace::BacktraceStatus::Disabled
    );
    Ok(())
}

#[tokio::test]
async fn default_stack_logs_handler_lifecycle() -> anyhow::Result<()> {
    let capture = LogCapture::new();
    let _guard = capture.install();

    let bus = EventBus::new();
    bus.subscribe(DOC_UPLOADED, RecordingHandler::new())?;
    bus.subscribe(DOC_UPLOADED, FailingHandler::new("boom"))?;
    let _ = bus.publish(&Context::new(), doc_uploaded("doc-1")).await;

    assert_eq!(capture.lines_containing("event handler started").len(), 2);
    assert_eq!(capture.lines_containing("event handler succeeded").len(), 1);
    let failed = capture.lines_containing("event handler failed");
    assert_eq!(failed.len(), 1);
    assert!(failed[0].contains("boom"));
    assert!(failed[0].contains(DOC_UPLOADED));
    Ok(())
}

/// Layer that panics before reaching the handler it wraps.
struct ExplodingLayer {
    next: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for ExplodingLayer {
    async fn handle(&self, ctx: &Context, event: &SharedEvent) -> HandlerResult {
        if event.metadata().contains_key("tenant") {
            panic!("middleware blew up");
        }
        self.next.handle(ctx, event).await
    }
}

#[tokio::test]
async fn recovery_catches_panics_from_inner_middleware() -> anyhow::Result<()> {
    let chain = MiddlewareChain::empty()
        .with(RecoveryMiddleware::new())
        .with(middleware_fn("exploding", |next| {
            Arc::new(ExplodingLayer { next }) as Arc<dyn Handler>
        }));
    let bus = EventBus::with_middleware(chain);
    let recorder = RecordingHandler::new();
    bus.subscribe(DOC_UPLOADED, recorder.clone())?;

    let err = bus
        .publish(&Context::new(), doc_uploaded("doc-1"))
        .await
        .expect_err("layer panic reported");
    let failure = &err.as_dispatch().expect("dispatch error").failures()[0];
    let report = failure.panic().expect("panic report");
    assert_eq!(report.message(), "middleware blew up");
    assert_ne!(
        report.backtrace().status(),
        std::backtrace::BacktraceStatus::Disabled,
        "recovery captured the panic, not the task join"
    );
    assert_eq!(recorder.count(), 0);

    bus.publish(&Context::new(), bare_event(DOC_UPLOADED)).await?;
    assert_eq!(recorder.count(), 1);
    Ok(())
}
