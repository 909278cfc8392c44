//! Callback fan-out and panic isolation

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::metrics::Metrics;
use crate::tests::test_utils::wait_until;
use crate::watcher::dispatch::CallbackDispatcher;
use crate::watcher::types::{EventKind, SemanticEvent};

fn counter_callback(counter: Arc<AtomicUsize>) -> impl Fn(&SemanticEvent) + Send + Sync + 'static {
    move |_event| {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_siblings() {
    let dispatcher = CallbackDispatcher::new();
    let metrics = Arc::new(Metrics::new());
    let survivor = Arc::new(AtomicUsize::new(0));

    dispatcher.register(EventKind::Modify, |_event| panic!("subscriber blew up"));
    dispatcher.register(EventKind::Modify, counter_callback(Arc::clone(&survivor)));

    let event = SemanticEvent::new("/w/a.txt", EventKind::Modify, 0, false);
    assert_eq!(dispatcher.dispatch(event, &metrics), 2);

    assert!(
        wait_until(Duration::from_secs(2), || {
            survivor.load(Ordering::SeqCst) == 1 && metrics.snapshot().callback_panics == 1
        })
        .await
    );
    assert_eq!(metrics.snapshot().events_processed, 1);
}

#[tokio::test]
async fn test_dispatch_only_reaches_matching_kind() {
    let dispatcher = CallbackDispatcher::new();
    let metrics = Arc::new(Metrics::new());
    let creates = Arc::new(AtomicUsize::new(0));
    let deletes = Arc::new(AtomicUsize::new(0));

    dispatcher.register(EventKind::Create, counter_callback(Arc::clone(&creates)));
    dispatcher.register(EventKind::Delete, counter_callback(Arc::clone(&deletes)));

    dispatcher.dispatch(SemanticEvent::new("/w/a", EventKind::Create, 0, false), &metrics);
    dispatcher.dispatch(SemanticEvent::new("/w/b", EventKind::Create, 0, false), &metrics);

    assert!(wait_until(Duration::from_secs(2), || creates.load(Ordering::SeqCst) == 2).await);
    assert_eq!(deletes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_registrations_each_fire() {
    let dispatcher = CallbackDispatcher::new();
    let metrics = Arc::new(Metrics::new());
    let hits = Arc::new(AtomicUsize::new(0));

    dispatcher.register(EventKind::Rename, counter_callback(Arc::clone(&hits)));
    dispatcher.register(EventKind::Rename, counter_callback(Arc::clone(&hits)));
    assert_eq!(dispatcher.callback_count(EventKind::Rename), 2);

    dispatcher.dispatch(SemanticEvent::new("/w/a", EventKind::Rename, 0, false), &metrics);
    assert!(wait_until(Duration::from_secs(2), || hits.load(Ordering::SeqCst) == 2).await);
}

#[tokio::test]
async fn test_events_without_subscribers_still_count() {
    let dispatcher = CallbackDispatcher::new();
    let metrics = Arc::new(Metrics::new());

    let scheduled = dispatcher.dispatch(SemanticEvent::new("/w/a", EventKind::Move, 0, false), &metrics);
    assert_eq!(scheduled, 0);
    assert_eq!(metrics.snapshot().events_processed, 1);
}
