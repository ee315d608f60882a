use lookout_common::DocumentError;
use lookout_dom::{ElementSpec, MemoryDocument};
use lookout_engine::{ElementWatcher, Lookout, Selector, WaitError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

fn sel(s: &str) -> Selector {
    Selector::from(s)
}

#[tokio::test(start_paused = true)]
async fn test_present_selectors_resolve_without_subscribing() {
    let doc = Arc::new(MemoryDocument::default());
    let nav = doc.append(doc.body(), ElementSpec::new("nav").id("menu")).unwrap();
    let link = doc.append(nav, ElementSpec::new("a")).unwrap();

    let start = Instant::now();
    let elements = ElementWatcher::new(doc.clone())
        .watch(["#menu", "nav a"], Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(elements[&sel("#menu")], vec![nav]);
    assert_eq!(elements[&sel("nav a")], vec![link]);
    assert_eq!(doc.subscriptions_opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_names_every_unmatched_selector() {
    let doc = Arc::new(MemoryDocument::default());

    let start = Instant::now();
    let error = ElementWatcher::new(doc.clone())
        .watch(["a", "b"], Duration::from_millis(1000))
        .await
        .unwrap_err();

    assert_eq!(start.elapsed(), Duration::from_millis(1000));
    assert_eq!(
        error,
        WaitError::Timeout {
            pending: vec![sel("a"), sel("b")]
        }
    );
    assert_eq!(error.to_string(), "Timeout while waiting for selectors: a, b");
    assert_eq!(doc.subscriptions_opened(), 1);
    assert_eq!(doc.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_element_resolves_and_releases_subscription() {
    let doc = Arc::new(MemoryDocument::default());
    let writer = doc.clone();
    let inserted = tokio::spawn(async move {
        sleep(Duration::from_millis(200)).await;
        writer
            .append(writer.body(), ElementSpec::new("button").id("login-button"))
            .unwrap()
    });

    let start = Instant::now();
    let elements = ElementWatcher::new(doc.clone())
        .watch("#login-button", Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(start.elapsed(), Duration::from_millis(200));
    assert_eq!(elements[&sel("#login-button")], vec![inserted.await.unwrap()]);
    assert_eq!(doc.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_omits_resolved_selectors() {
    let doc = Arc::new(MemoryDocument::default());
    doc.append(doc.body(), ElementSpec::new("header")).unwrap();

    let error = ElementWatcher::new(doc.clone())
        .watch(vec!["header", "#promo"], Duration::from_millis(1500))
        .await
        .unwrap_err();

    assert_eq!(
        error,
        WaitError::Timeout {
            pending: vec![sel("#promo")]
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_selectors_tracked_once() {
    let doc = Arc::new(MemoryDocument::default());
    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        writer.append(writer.body(), ElementSpec::new("dialog")).unwrap();
    });

    let elements = ElementWatcher::new(doc)
        .watch(["dialog", "dialog"], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(elements.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_selector_fails_immediately() {
    let doc = Arc::new(MemoryDocument::default());
    let error = ElementWatcher::new(doc.clone())
        .watch("div >", Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        WaitError::Document(DocumentError::InvalidSelector(_))
    ));
    assert_eq!(doc.subscriptions_opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handler_sees_failure_once() {
    let doc = Arc::new(MemoryDocument::default());
    let calls = AtomicUsize::new(0);

    let result = ElementWatcher::new(doc)
        .watch_with_handler("#missing", Duration::from_secs(1), |error| {
            assert!(error.is_timeout());
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_mutations_do_not_resolve() {
    let doc = Arc::new(MemoryDocument::default());
    let writer = doc.clone();
    tokio::spawn(async move {
        for _ in 0..5 {
            sleep(Duration::from_millis(100)).await;
            writer.append(writer.body(), ElementSpec::new("p")).unwrap();
        }
    });

    let start = Instant::now();
    let result = ElementWatcher::new(doc)
        .watch("#cart", Duration::from_millis(1000))
        .await;

    assert!(result.unwrap_err().is_timeout());
    assert_eq!(start.elapsed(), Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_attribute_change_resolves_selector() {
    let doc = Arc::new(MemoryDocument::default());
    let panel = doc
        .append(doc.body(), ElementSpec::new("section").id("panel"))
        .unwrap();
    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        writer.set_attribute(panel, "data-ready", "yes").unwrap();
    });

    let start = Instant::now();
    let elements = ElementWatcher::new(doc.clone())
        .watch("[data-ready=yes]", Duration::from_millis(1000))
        .await
        .unwrap();

    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!(elements[&sel("[data-ready=yes]")], vec![panel]);
    assert_eq!(doc.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watch_elements_hands_timeout_to_handler() {
    let doc = Arc::new(MemoryDocument::default());
    let lookout = Lookout::with_log_sink(doc.clone());

    let mut seen = Vec::new();
    let start = Instant::now();
    let error = lookout
        .watch_elements_with_handler("#promo", Some(Duration::from_millis(1000)), |error| {
            seen.push(error.to_string())
        })
        .await
        .unwrap_err();

    assert_eq!(start.elapsed(), Duration::from_millis(1000));
    assert_eq!(seen, vec!["Timeout while waiting for selectors: #promo".to_string()]);
    assert_eq!(error, WaitError::Timeout { pending: vec![sel("#promo")] });
}

#[tokio::test(start_paused = true)]
async fn test_watch_elements_handler_untouched_on_success() {
    let doc = Arc::new(MemoryDocument::default());
    let promo = doc.append(doc.body(), ElementSpec::new("aside").id("promo")).unwrap();
    let lookout = Lookout::with_log_sink(doc.clone());

    let mut calls = 0;
    let elements = lookout
        .watch_elements_with_handler("#promo", None, |_| calls += 1)
        .await
        .unwrap();

    assert_eq!(calls, 0);
    assert_eq!(elements[&sel("#promo")], vec![promo]);
}
