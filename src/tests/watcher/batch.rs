//! Priority batching

use crate::watcher::batch::{PriorityBatchScheduler, prioritize};
use crate::watcher::types::{EventKind, PriorityMap, SemanticEvent};

fn event(name: &str, kind: EventKind) -> SemanticEvent {
    SemanticEvent::new(format!("/w/{}", name), kind, 0, false)
}

fn kinds(events: &[SemanticEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

#[test]
fn test_flush_orders_by_default_priority() {
    let priorities = PriorityMap::default();
    let mut scheduler = PriorityBatchScheduler::new();

    assert!(scheduler.push(event("m", EventKind::Modify), 10, &priorities).is_none());
    assert!(scheduler.push(event("d", EventKind::Delete), 10, &priorities).is_none());
    assert!(scheduler.push(event("c", EventKind::Create), 10, &priorities).is_none());

    let batch = scheduler.flush(&priorities).expect("batch should flush");
    assert_eq!(
        kinds(&batch.events),
        vec![EventKind::Delete, EventKind::Create, EventKind::Modify]
    );
    assert!(scheduler.is_empty());
}

#[test]
fn test_equal_priority_keeps_arrival_order() {
    let priorities = PriorityMap::default();
    let mut events = vec![
        event("one", EventKind::Modify),
        event("gone", EventKind::Delete),
        event("two", EventKind::Modify),
        event("three", EventKind::Modify),
    ];
    prioritize(&mut events, &priorities);

    let names: Vec<_> = events.iter().filter_map(|e| e.file_name()).collect();
    assert_eq!(names, vec!["gone", "one", "two", "three"]);
}

#[test]
fn test_full_batch_flushes_on_push() {
    let priorities = PriorityMap::default();
    let mut scheduler = PriorityBatchScheduler::new();

    assert!(scheduler.push(event("a", EventKind::Modify), 2, &priorities).is_none());
    let batch = scheduler
        .push(event("b", EventKind::Create), 2, &priorities)
        .expect("second push fills the batch");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.events[0].kind, EventKind::Create);
    assert_eq!(scheduler.len(), 0);
}

#[test]
fn test_empty_flush_yields_nothing() {
    let mut scheduler = PriorityBatchScheduler::new();
    assert!(scheduler.flush(&PriorityMap::default()).is_none());
}

#[test]
fn test_custom_priorities_reorder_batch() {
    let priorities = PriorityMap::new([(EventKind::Modify, 1), (EventKind::Delete, 2)]);
    let mut scheduler = PriorityBatchScheduler::new();
    scheduler.push(event("c", EventKind::Create), 10, &priorities);
    scheduler.push(event("d", EventKind::Delete), 10, &priorities);
    scheduler.push(event("m", EventKind::Modify), 10, &priorities);

    let batch = scheduler.flush(&priorities).unwrap();
    assert_eq!(
        kinds(&batch.events),
        vec![EventKind::Modify, EventKind::Delete, EventKind::Create]
    );
}
