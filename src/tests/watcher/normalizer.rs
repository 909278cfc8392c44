//! Raw record normalization: debounce, move heuristic, extension filter

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::config::Config;
use crate::watcher::events::{EventNormalizer, Normalized};
use crate::watcher::types::{ChangeOp, EventKind, RawChangeRecord, SemanticEvent};

fn normalizer() -> EventNormalizer {
    EventNormalizer::new(Config::default().debounce_capacity)
}

fn expect_event(result: Normalized) -> SemanticEvent {
    match result {
        Normalized::Event(event) => event,
        other => panic!("expected an event, got {:?}", other),
    }
}

#[test]
fn test_debounce_collapses_repeated_writes() {
    let config = Config::default();
    let normalizer = normalizer();
    let path = PathBuf::from("/data/report.txt");
    let start = Instant::now();

    let mut delivered = 0;
    for i in 0..5 {
        let record = RawChangeRecord::new(&path, ChangeOp::WRITE);
        let at = start + Duration::from_millis(i * 10);
        if let Normalized::Event(event) = normalizer.normalize_at(&record, &config, at) {
            assert_eq!(event.kind, EventKind::Modify);
            delivered += 1;
        }
    }
    assert_eq!(delivered, 1);

    // A write after the window passes again
    let later = start + Duration::from_millis(300);
    let record = RawChangeRecord::new(&path, ChangeOp::WRITE);
    assert!(matches!(
        normalizer.normalize_at(&record, &config, later),
        Normalized::Event(_)
    ));
}

#[test]
fn test_debounce_is_scoped_per_operation() {
    let config = Config::default();
    let normalizer = normalizer();
    let path = PathBuf::from("/data/report.txt");
    let now = Instant::now();

    let create = RawChangeRecord::new(&path, ChangeOp::CREATE);
    let write = RawChangeRecord::new(&path, ChangeOp::WRITE);

    let first = expect_event(normalizer.normalize_at(&create, &config, now));
    let second = expect_event(normalizer.normalize_at(&write, &config, now));
    assert_eq!(first.kind, EventKind::Create);
    assert_eq!(second.kind, EventKind::Modify);
}

#[test]
fn test_zero_debounce_disables_suppression() {
    let config = Config {
        debounce_ms: 0,
        ..Config::default()
    };
    let normalizer = normalizer();
    let record = RawChangeRecord::new("/data/a.txt", ChangeOp::WRITE);
    let now = Instant::now();

    assert!(matches!(normalizer.normalize_at(&record, &config, now), Normalized::Event(_)));
    assert!(matches!(normalizer.normalize_at(&record, &config, now), Normalized::Event(_)));
}

#[test]
fn test_delete_then_create_becomes_move() {
    let config = Config::default();
    let normalizer = normalizer();
    let now = Instant::now();

    let delete = RawChangeRecord::new("/a/x.txt", ChangeOp::REMOVE);
    let deleted = expect_event(normalizer.normalize_at(&delete, &config, now));
    assert_eq!(deleted.kind, EventKind::Delete);
    assert_eq!(normalizer.pending_moves(), 1);

    let create = RawChangeRecord::new("/b/x.txt", ChangeOp::CREATE);
    let moved = expect_event(normalizer.normalize_at(&create, &config, now + Duration::from_secs(1)));
    assert_eq!(moved.kind, EventKind::Move);
    assert_eq!(moved.moved_from, Some(PathBuf::from("/a/x.txt")));
    assert_eq!(normalizer.pending_moves(), 0);
}

#[test]
fn test_rename_then_create_becomes_move() {
    let config = Config::default();
    let normalizer = normalizer();
    let now = Instant::now();

    let rename = RawChangeRecord::new("/a/notes.md", ChangeOp::RENAME);
    let renamed = expect_event(normalizer.normalize_at(&rename, &config, now));
    assert_eq!(renamed.kind, EventKind::Rename);

    let create = RawChangeRecord::new("/b/notes.md", ChangeOp::CREATE);
    let moved = expect_event(normalizer.normalize_at(&create, &config, now));
    assert_eq!(moved.kind, EventKind::Move);
    assert_eq!(moved.moved_from, Some(PathBuf::from("/a/notes.md")));
}

#[test]
fn test_expired_marker_yields_plain_create() {
    let config = Config::default();
    let normalizer = normalizer();
    let now = Instant::now();

    let delete = RawChangeRecord::new("/a/x.txt", ChangeOp::REMOVE);
    normalizer.normalize_at(&delete, &config, now);

    let create = RawChangeRecord::new("/b/x.txt", ChangeOp::CREATE);
    let created = expect_event(normalizer.normalize_at(&create, &config, now + Duration::from_secs(6)));
    assert_eq!(created.kind, EventKind::Create);
    assert!(created.moved_from.is_none());
    assert_eq!(normalizer.pending_moves(), 0);
}

#[test]
fn test_different_base_name_is_not_a_move() {
    let config = Config::default();
    let normalizer = normalizer();
    let now = Instant::now();

    normalizer.normalize_at(&RawChangeRecord::new("/a/x.txt", ChangeOp::REMOVE), &config, now);
    let created = expect_event(normalizer.normalize_at(
        &RawChangeRecord::new("/b/y.txt", ChangeOp::CREATE),
        &config,
        now,
    ));
    assert_eq!(created.kind, EventKind::Create);
    assert_eq!(normalizer.pending_moves(), 1);
}

#[test]
fn test_extension_allow_list() {
    let config = Config {
        extensions: vec![".txt".into()],
        ..Config::default()
    };
    let normalizer = normalizer();
    let now = Instant::now();

    let md = RawChangeRecord::new("/data/foo.md", ChangeOp::CREATE);
    assert!(matches!(normalizer.normalize_at(&md, &config, now), Normalized::Ignored));

    let txt = RawChangeRecord::new("/data/FOO.TXT", ChangeOp::CREATE);
    assert!(matches!(normalizer.normalize_at(&txt, &config, now), Normalized::Event(_)));

    // Ignored records never reach the debouncer
    assert_eq!(normalizer.debounce_entries(), 1);
}

#[test]
fn test_unclassified_ops_become_modify() {
    let config = Config::default();
    let normalizer = normalizer();
    let now = Instant::now();

    let chmod = expect_event(normalizer.normalize_at(
        &RawChangeRecord::new("/data/a.sh", ChangeOp::CHMOD),
        &config,
        now,
    ));
    assert_eq!(chmod.kind, EventKind::Modify);

    let empty = expect_event(normalizer.normalize_at(
        &RawChangeRecord::new("/data/b.sh", ChangeOp::empty()),
        &config,
        now,
    ));
    assert_eq!(empty.kind, EventKind::Modify);
}

#[test]
fn test_create_wins_over_other_bits() {
    let config = Config::default();
    let normalizer = normalizer();
    let event = expect_event(normalizer.normalize_at(
        &RawChangeRecord::new("/data/a.txt", ChangeOp::CREATE | ChangeOp::WRITE),
        &config,
        Instant::now(),
    ));
    assert_eq!(event.kind, EventKind::Create);
}

#[test]
fn test_events_carry_stat_information() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("payload.bin");
    fs::write(&file, vec![0u8; 42]).unwrap();

    let config = Config::default();
    let normalizer = normalizer();
    let now = Instant::now();

    let event = expect_event(normalizer.normalize_at(
        &RawChangeRecord::new(&file, ChangeOp::WRITE),
        &config,
        now,
    ));
    assert_eq!(event.size, 42);
    assert!(!event.is_dir);

    let dir_event = expect_event(normalizer.normalize_at(
        &RawChangeRecord::new(dir.path(), ChangeOp::CREATE),
        &config,
        now,
    ));
    assert!(dir_event.is_dir);

    let gone = expect_event(normalizer.normalize_at(
        &RawChangeRecord::new(dir.path().join("missing"), ChangeOp::REMOVE),
        &config,
        now,
    ));
    assert_eq!(gone.size, 0);
    assert!(!gone.is_dir);
}
