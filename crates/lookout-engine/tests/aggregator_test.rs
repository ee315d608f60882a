use lookout_dom::{ElementSpec, MemoryDocument};
use lookout_engine::{
    Condition, ConditionAggregator, ElementMap, EngineError, ErrorReport, ErrorSink, Selector,
    ValidationError, WaitError, WaitOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[derive(Default)]
struct CollectingSink(Mutex<Vec<ErrorReport>>);

impl ErrorSink for CollectingSink {
    fn report(&self, report: &ErrorReport) {
        self.0.lock().push(report.clone());
    }
}

struct Harness {
    doc: Arc<MemoryDocument>,
    sink: Arc<CollectingSink>,
    aggregator: ConditionAggregator<MemoryDocument>,
}

fn harness() -> Harness {
    let doc = Arc::new(MemoryDocument::new("https://app.test/login"));
    let sink = Arc::new(CollectingSink::default());
    let aggregator = ConditionAggregator::new(doc.clone(), sink.clone());
    Harness {
        doc,
        sink,
        aggregator,
    }
}

type Slot<T> = Arc<Mutex<Vec<(Duration, T)>>>;

/// Records each invocation with its offset from `start`.
fn recorder<T: Send + 'static>(start: Instant) -> (Slot<T>, impl FnOnce(T) + Send + 'static) {
    let slot: Slot<T> = Arc::new(Mutex::new(Vec::new()));
    let store = slot.clone();
    (slot, move |value: T| store.lock().push((start.elapsed(), value)))
}

#[tokio::test(start_paused = true)]
async fn test_empty_conditions_succeed_immediately() {
    let h = harness();
    let (successes, on_success) = recorder::<ElementMap>(Instant::now());

    let handle = h
        .aggregator
        .run(WaitOptions::new(Vec::new()), on_success)
        .unwrap();

    // Delivered before `run` returned.
    let successes = successes.lock();
    assert_eq!(successes.len(), 1);
    assert!(successes[0].1.is_empty());
    assert!(handle.is_finished());
    assert_eq!(h.doc.subscriptions_opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_login_button_and_scroll() {
    let h = harness();
    let scroll_y = Arc::new(AtomicU64::new(0));

    let doc = h.doc.clone();
    let scroll = scroll_y.clone();
    let page = tokio::spawn(async move {
        sleep(Duration::from_millis(200)).await;
        let button = doc
            .append(doc.body(), ElementSpec::new("button").id("login-button"))
            .unwrap();
        sleep(Duration::from_millis(300)).await;
        scroll.store(120, Ordering::SeqCst);
        button
    });

    let start = Instant::now();
    let (successes, on_success) = recorder::<ElementMap>(start);
    let scrolled = scroll_y.clone();
    let options = WaitOptions::new([
        Condition::selector("#login-button"),
        Condition::predicate(move || scrolled.load(Ordering::SeqCst) > 0),
    ])
    .activity("login")
    .timeout(Duration::from_millis(2000))
    .poll_interval(Duration::from_millis(50));

    let handle = h.aggregator.run(options, on_success).unwrap();
    handle.finished().await;

    let button = page.await.unwrap();
    let successes = successes.lock();
    assert_eq!(successes.len(), 1);
    let (at, elements) = &successes[0];
    assert!(*at >= Duration::from_millis(500));
    assert!(*at <= Duration::from_millis(550));
    assert_eq!(elements.len(), 1);
    assert_eq!(elements[&Selector::from("#login-button")], vec![button]);
    assert!(h.sink.0.lock().is_empty());
    assert_eq!(h.doc.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_satisfied_selector_and_stuck_predicate_fail() {
    let h = harness();
    let doc = h.doc.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        doc.append(doc.body(), ElementSpec::new("form")).unwrap();
    });

    let start = Instant::now();
    let (failures, on_error) = recorder::<ErrorReport>(start);
    let (successes, on_success) = recorder::<ElementMap>(start);
    let options = WaitOptions::new([Condition::selector("form"), Condition::predicate(|| false)])
        .activity("checkout")
        .timeout(Duration::from_millis(1000))
        .on_error(on_error);

    h.aggregator.run(options, on_success).unwrap().finished().await;

    assert!(successes.lock().is_empty());
    let failures = failures.lock();
    assert_eq!(failures.len(), 1);
    let (at, report) = &failures[0];
    assert_eq!(*at, Duration::from_millis(1000));
    assert_eq!(report.activity.as_deref(), Some("checkout"));
    assert_eq!(report.location.as_deref(), Some("https://app.test/login"));
    assert_eq!(
        report.error,
        EngineError::Wait(WaitError::Timeout { pending: vec![] })
    );
    // The selector watch subscribed once and let go when it resolved.
    assert_eq!(h.doc.subscriptions_opened(), 1);
    assert_eq!(h.doc.active_subscriptions(), 0);
    // A handler was supplied, so the sink stays quiet.
    assert!(h.sink.0.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failure_without_handler_goes_to_sink() {
    let h = harness();
    let successes = Arc::new(AtomicUsize::new(0));
    let counter = successes.clone();

    let options = WaitOptions::new([Condition::selector("#promo"), Condition::selector("#cart")])
        .timeout(Duration::from_millis(1000));
    h.aggregator
        .run(options, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
        .finished()
        .await;

    assert_eq!(successes.load(Ordering::SeqCst), 0);
    let reports = h.sink.0.lock();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].activity.is_none());
    assert!(matches!(
        &reports[0].error,
        EngineError::Wait(WaitError::Timeout { pending }) if pending.len() == 1
    ));
}

#[tokio::test(start_paused = true)]
async fn test_predicate_error_fails_fast_and_releases_watchers() {
    let h = harness();
    let start = Instant::now();
    let (failures, on_error) = recorder::<ErrorReport>(start);
    let (successes, on_success) = recorder::<ElementMap>(start);

    let options = WaitOptions::new([
        Condition::selector("#never"),
        Condition::fallible(|| Err("session expired".into())),
    ])
    .timeout(Duration::from_secs(5))
    .poll_interval(Duration::from_millis(50))
    .on_error(on_error);

    h.aggregator.run(options, on_success).unwrap().finished().await;

    assert!(successes.lock().is_empty());
    let failures = failures.lock();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, Duration::from_millis(50));
    assert_eq!(
        failures[0].1.error.to_string(),
        "Predicate threw: session expired"
    );
    assert_eq!(h.doc.subscriptions_opened(), 1);
    assert_eq!(h.doc.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_validation_errors_are_returned_synchronously() {
    let h = harness();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let short_timeout = WaitOptions::new([Condition::selector("body")])
        .timeout(Duration::from_millis(999))
        .on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let error = h.aggregator.run(short_timeout, |_| {}).err();
    assert_eq!(
        error,
        Some(ValidationError::TimeoutTooShort {
            min: Duration::from_millis(1000),
            actual: Duration::from_millis(999),
        })
    );

    let zero_interval = WaitOptions::new([Condition::predicate(|| true)])
        .poll_interval(Duration::ZERO);
    assert!(matches!(
        h.aggregator.run(zero_interval, |_| {}),
        Err(ValidationError::PollIntervalTooShort { .. })
    ));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(h.sink.0.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_everything_silently() {
    let h = harness();
    let start = Instant::now();
    let (failures, on_error) = recorder::<ErrorReport>(start);
    let (successes, on_success) = recorder::<ElementMap>(start);

    let options = WaitOptions::new([Condition::selector("#never"), Condition::predicate(|| false)])
        .timeout(Duration::from_millis(1000))
        .on_error(on_error);
    let handle = h.aggregator.run(options, on_success).unwrap();

    sleep(Duration::from_millis(300)).await;
    assert_eq!(h.doc.active_subscriptions(), 1);
    handle.cancel();
    handle.finished().await;

    sleep(Duration::from_secs(2)).await;
    assert!(successes.lock().is_empty());
    assert!(failures.lock().is_empty());
    assert_eq!(h.doc.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_results_merge_across_selector_conditions() {
    let h = harness();
    let header = h.doc.append(h.doc.body(), ElementSpec::new("header")).unwrap();
    let doc = h.doc.clone();
    let footer = tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        doc.append(doc.body(), ElementSpec::new("footer")).unwrap()
    });

    let (successes, on_success) = recorder::<ElementMap>(Instant::now());
    let options = WaitOptions::new([Condition::from("header"), Condition::from("footer")])
        .timeout(Duration::from_millis(1000));
    h.aggregator.run(options, on_success).unwrap().finished().await;

    let footer = footer.await.unwrap();
    let successes = successes.lock();
    let elements = &successes[0].1;
    assert_eq!(elements[&Selector::from("header")], vec![header]);
    assert_eq!(elements[&Selector::from("footer")], vec![footer]);
}

#[tokio::test(start_paused = true)]
async fn test_class_change_satisfies_selector_condition() {
    let h = harness();
    let card = h
        .doc
        .append(h.doc.body(), ElementSpec::new("div").class("card"))
        .unwrap();
    let doc = h.doc.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        doc.set_attribute(card, "class", "card visible").unwrap();
    });

    let start = Instant::now();
    let (successes, on_success) = recorder::<ElementMap>(start);
    let options = WaitOptions::new([Condition::selector(".card.visible")])
        .timeout(Duration::from_millis(1000));

    h.aggregator.run(options, on_success).unwrap().finished().await;

    let successes = successes.lock();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].0, Duration::from_millis(100));
    assert_eq!(successes[0].1[&Selector::from(".card.visible")], vec![card]);
    assert!(h.sink.0.lock().is_empty());
    assert_eq!(h.doc.active_subscriptions(), 0);
}
