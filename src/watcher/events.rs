//! Raw record normalization
//!
//! Turns `RawChangeRecord`s into `SemanticEvent`s: extension filtering,
//! per-operation debounce, kind resolution with move detection, and a
//! best-effort stat for size and directory flag.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::watcher::debounce::Debouncer;
use crate::watcher::filtering::matches_extension;
use crate::watcher::moves::MoveTracker;
use crate::watcher::types::{ChangeOp, EventKind, RawChangeRecord, SemanticEvent};

/// Result of running one raw record through the normalizer
#[derive(Debug)]
pub enum Normalized {
    Event(SemanticEvent),
    /// Dropped by the extension allow-list
    Ignored,
    /// Same (path, operation) seen inside the debounce window
    Debounced,
}

/// Debounce and move-tracking state. Survives config reloads.
#[derive(Debug)]
pub struct EventNormalizer {
    debouncer: Mutex<Debouncer>,
    moves: Mutex<MoveTracker>,
}

impl EventNormalizer {
    pub fn new(debounce_capacity: usize) -> Self {
        Self {
            debouncer: Mutex::new(Debouncer::new(debounce_capacity)),
            moves: Mutex::new(MoveTracker::default()),
        }
    }

    pub fn normalize(&self, record: &RawChangeRecord, config: &Config) -> Normalized {
        self.normalize_at(record, config, Instant::now())
    }

    pub fn normalize_at(&self, record: &RawChangeRecord, config: &Config, now: Instant) -> Normalized {
        if !matches_extension(&record.path, &config.extensions) {
            debug!("Ignoring {} (extension not allowed)", record.path.display());
            return Normalized::Ignored;
        }

        {
            let mut debouncer = self.debouncer.lock().unwrap_or_else(PoisonError::into_inner);
            debouncer.set_capacity(config.debounce_capacity);
            if debouncer.should_suppress(&record.path, record.op, config.debounce(), now) {
                debug!("Debounced {} {}", record.op, record.path.display());
                return Normalized::Debounced;
            }
        }

        let (kind, moved_from) = self.resolve_kind(record, now);
        let (size, is_dir) = stat(&record.path);

        Normalized::Event(
            SemanticEvent::new(record.path.clone(), kind, size, is_dir).with_source(moved_from),
        )
    }

    fn resolve_kind(&self, record: &RawChangeRecord, now: Instant) -> (EventKind, Option<PathBuf>) {
        let op = record.op;
        let mut moves = self.moves.lock().unwrap_or_else(PoisonError::into_inner);

        if op.contains(ChangeOp::CREATE) {
            match moves.take_match(&record.path, now) {
                Some(source) => (EventKind::Move, Some(source)),
                None => (EventKind::Create, None),
            }
        } else if op.contains(ChangeOp::WRITE) {
            (EventKind::Modify, None)
        } else if op.contains(ChangeOp::REMOVE) {
            moves.record(&record.path, now);
            (EventKind::Delete, None)
        } else if op.contains(ChangeOp::RENAME) {
            moves.record(&record.path, now);
            (EventKind::Rename, None)
        } else {
            (EventKind::Modify, None)
        }
    }

    pub fn pending_moves(&self) -> usize {
        self.moves.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn debounce_entries(&self) -> usize {
        self.debouncer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Size and directory flag; missing paths report (0, false)
fn stat(path: &std::path::Path) -> (u64, bool) {
    match fs::metadata(path) {
        Ok(meta) => (meta.len(), meta.is_dir()),
        Err(_) => (0, false),
    }
}
