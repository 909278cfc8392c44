// Driftwatch - File system change pipeline library
//!
//! Driftwatch turns raw file-system notifications into a clean stream of
//! semantic events (create, modify, delete, rename, move) with debounce,
//! best-effort move detection, priority batching, isolated callback dispatch
//! and automatic recovery of the underlying watch backend.

pub mod config;
pub mod error;
pub mod metrics;
pub mod watcher;


// Re-export common types
pub use config::Config;
pub use error::{Result, WatchError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use watcher::{
    ChangeOp, EventKind, FileWatcher, PipelineStatus, RawChangeRecord, RecoveryState, SemanticEvent,
};
