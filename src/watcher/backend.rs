//! Watch backend abstraction
//!
//! The pipeline never talks to `notify` directly. A `BackendFactory` builds a
//! `WatchBackend` wired to a `BackendSink`; the sink forwards raw records and
//! stream errors into the pipeline's bounded channels without ever blocking
//! the backend's own thread.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::{Result, WatchError};
use crate::metrics::Metrics;
use crate::watcher::types::{ChangeOp, RawChangeRecord};

/// Stream-level failure reported by a backend instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// Generation of the backend that reported it; stale generations are ignored
    pub generation: u64,
    pub message: String,
}

/// A live watch handle. Paths are watched non-recursively; the registry
/// expands recursive registrations itself.
pub trait WatchBackend: Send {
    fn watch(&mut self, path: &Path) -> Result<()>;
    fn unwatch(&mut self, path: &Path) -> Result<()>;
}

pub trait BackendFactory: Send + Sync {
    fn create(&self, sink: BackendSink) -> Result<Box<dyn WatchBackend>>;
}

/// Channel ends handed to each backend instance
#[derive(Debug, Clone)]
pub struct BackendSink {
    records: mpsc::Sender<RawChangeRecord>,
    errors: mpsc::Sender<BackendFailure>,
    generation: u64,
    metrics: Arc<Metrics>,
}

impl BackendSink {
    pub(crate) fn new(
        records: mpsc::Sender<RawChangeRecord>,
        errors: mpsc::Sender<BackendFailure>,
        generation: u64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            records,
            errors,
            generation,
            metrics,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hand a record to the pipeline. A full queue drops the record.
    pub fn send_record(&self, record: RawChangeRecord) -> bool {
        match self.records.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                self.metrics.record_dropped();
                debug!("Raw record queue full, dropping {}", record.path.display());
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Report a stream failure. Extra failures while one is pending are dropped.
    pub fn send_error(&self, message: impl Into<String>) {
        let failure = BackendFailure {
            generation: self.generation,
            message: message.into(),
        };
        if let Err(TrySendError::Full(failure)) = self.errors.try_send(failure) {
            debug!("Backend failure queue full, dropping: {}", failure.message);
        }
    }
}

/// Builds `notify::RecommendedWatcher` backends
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackendFactory;

impl BackendFactory for NotifyBackendFactory {
    fn create(&self, sink: BackendSink) -> Result<Box<dyn WatchBackend>> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for record in records_from_event(&event) {
                    sink.send_record(record);
                }
            }
            Err(e) => {
                warn!("File watcher error: {}", e);
                sink.send_error(e.to_string());
            }
        })?;
        Ok(Box::new(NotifyBackend { watcher }))
    }
}

struct NotifyBackend {
    watcher: RecommendedWatcher,
}

impl WatchBackend for NotifyBackend {
    fn watch(&mut self, path: &Path) -> Result<()> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(WatchError::from)
    }

    fn unwatch(&mut self, path: &Path) -> Result<()> {
        self.watcher.unwatch(path).map_err(|e| match e.kind {
            notify::ErrorKind::WatchNotFound => WatchError::WatchNotFound(path.to_path_buf()),
            _ => WatchError::from(e),
        })
    }
}

/// Translate a notify event into raw records.
///
/// Rename pairs become a RENAME on the source and a CREATE on the
/// destination, which is what the move heuristic expects to see.
pub fn records_from_event(event: &Event) -> Vec<RawChangeRecord> {
    let single = |op: ChangeOp| {
        event
            .paths
            .iter()
            .map(|path| RawChangeRecord::new(path.clone(), op))
            .collect::<Vec<_>>()
    };

    match &event.kind {
        NotifyKind::Create(_) => single(ChangeOp::CREATE),
        NotifyKind::Remove(_) => single(ChangeOp::REMOVE),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::To)) => single(ChangeOp::CREATE),
        NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut records = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                records.push(RawChangeRecord::new(from.clone(), ChangeOp::RENAME));
            }
            if let Some(to) = event.paths.get(1) {
                records.push(RawChangeRecord::new(to.clone(), ChangeOp::CREATE));
            }
            records
        }
        NotifyKind::Modify(ModifyKind::Name(_)) => single(ChangeOp::RENAME),
        NotifyKind::Modify(ModifyKind::Metadata(_)) => single(ChangeOp::CHMOD),
        NotifyKind::Modify(_) => single(ChangeOp::WRITE),
        NotifyKind::Access(_) => Vec::new(),
        NotifyKind::Any | NotifyKind::Other => single(ChangeOp::empty()),
    }
}
