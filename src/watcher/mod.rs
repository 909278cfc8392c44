//! File Watcher & Semantic Event Pipeline
//!
//! This module turns raw file-system notifications into a deduplicated,
//! prioritized stream of semantic events for registered callbacks.
//!
//! # Architecture
//!
//! The pipeline runs as a handful of Tokio tasks joined by bounded channels:
//! 1. **Ingest** → raw records from the backend are filtered, debounced,
//!    classified (with move detection) and pushed onto the event queue
//! 2. **Dispatch** → events pass straight through or are batched and
//!    priority-sorted, then handed to every matching callback
//! 3. **Control** → backend stream failures trigger a restart; config reload
//!    requests swap the active configuration
//! 4. **Config poller** → optional, fingerprints the config file every second
//!
//! Nothing on the ingest path blocks: full queues drop events and count them.

pub mod backend;
pub mod batch;
pub mod context;
pub mod debounce;
pub mod dispatch;
pub mod events;
pub mod filtering;
pub mod hot_reload;
pub mod moves;
pub mod recovery;
pub mod registry;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, WatchError};
use crate::metrics::MetricsSnapshot;

pub use backend::{BackendFactory, BackendFailure, BackendSink, NotifyBackendFactory, WatchBackend};
pub use batch::{EventBatch, PriorityBatchScheduler};
pub use context::PipelineContext;
pub use recovery::{RecoveryState, RetryPolicy};
pub use types::{ChangeOp, EventKind, PriorityMap, RawChangeRecord, SemanticEvent};

use context::PipelineReceivers;
use hot_reload::ConfigHotReloader;

/// Whether the pipeline tasks are up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Stopped,
    Running,
}

/// Owns the pipeline context and its tasks
pub struct FileWatcher {
    ctx: Arc<PipelineContext>,
    receivers: Option<PipelineReceivers>,
    stop_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FileWatcher {
    /// Create a watcher backed by the platform's native notification API
    pub fn new(config: Config) -> Result<Self> {
        Self::with_backend(config, Arc::new(NotifyBackendFactory))
    }

    /// Create a watcher over a custom backend
    pub fn with_backend(config: Config, factory: Arc<dyn BackendFactory>) -> Result<Self> {
        let (ctx, receivers) = PipelineContext::new(config, factory)?;
        Ok(Self {
            ctx,
            receivers: Some(receivers),
            stop_tx: None,
            tasks: Vec::new(),
        })
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn register_callback<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&SemanticEvent) + Send + Sync + 'static,
    {
        self.ctx.dispatcher.register(kind, callback);
    }

    pub async fn add_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ctx.add_path(path.as_ref()).await
    }

    pub async fn remove_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ctx.remove_path(path.as_ref()).await
    }

    pub fn list_paths(&self) -> Vec<PathBuf> {
        self.ctx.registry.list_paths()
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    pub fn status(&self) -> PipelineStatus {
        if self.is_running() {
            PipelineStatus::Running
        } else {
            PipelineStatus::Stopped
        }
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.ctx.recovery.state()
    }

    pub fn config(&self) -> Arc<Config> {
        self.ctx.config()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.ctx.metrics.reset();
        self.ctx.sync_path_gauge();
    }

    pub async fn apply_config(&self, config: Config) -> Result<()> {
        self.ctx.apply_config(config).await
    }

    pub async fn reload_config(&self) -> Result<()> {
        self.ctx.reload_from_file().await
    }

    /// Tear down and rebuild the backend as if its stream had failed
    pub async fn trigger_restart(&self) -> Result<usize> {
        if !self.is_running() {
            return Err(WatchError::NotRunning);
        }
        self.ctx.recovery.restart(&self.ctx).await
    }

    /// Register the configured paths and spawn the pipeline tasks
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(WatchError::AlreadyRunning);
        }

        let receivers = match self.receivers.take() {
            Some(receivers) => receivers,
            None => {
                // Previous run closed its channels and backend
                let receivers = self.ctx.open_channels();
                self.ctx.recovery.restart(&self.ctx).await?;
                receivers
            }
        };

        let config = self.ctx.config();
        for path in &config.watch_paths {
            if let Err(e) = self.ctx.add_path(path).await {
                self.receivers = Some(receivers);
                return Err(e);
            }
        }

        info!(
            "Starting file watcher over {} paths (batching: {})",
            self.ctx.registry.len(),
            config.batch_enabled
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity);
        let (reload_tx, reload_rx) = mpsc::channel(1);

        self.tasks.push(tokio::spawn(run_ingest_loop(
            Arc::clone(&self.ctx),
            receivers.records,
            events_tx,
            stop_rx.clone(),
        )));
        self.tasks.push(tokio::spawn(run_dispatch_loop(
            Arc::clone(&self.ctx),
            events_rx,
            stop_rx.clone(),
        )));
        self.tasks.push(tokio::spawn(run_control_loop(
            Arc::clone(&self.ctx),
            receivers.errors,
            reload_rx,
            stop_rx.clone(),
        )));
        if let Some(path) = config.hot_reload_path() {
            // Changes made from here on count, even before the poller first runs
            let mut reloader = ConfigHotReloader::new(path);
            reloader.prime();
            self.tasks.push(tokio::spawn(hot_reload::run_hot_reload_loop(
                Arc::clone(&self.ctx),
                reloader,
                reload_tx,
                stop_rx,
            )));
        }

        self.stop_tx = Some(stop_tx);
        self.ctx.set_running(true);
        info!("File watcher started");
        Ok(())
    }

    /// Signal every task to stop, wait for pending batches to flush, then
    /// drop the backend
    pub async fn stop(&mut self) -> Result<()> {
        let Some(stop_tx) = self.stop_tx.take() else {
            return Ok(());
        };
        self.ctx.set_running(false);
        let _ = stop_tx.send(true);

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Pipeline task ended abnormally: {}", e);
            }
        }

        self.ctx.close_backend().await;
        info!("File watcher stopped");
        Ok(())
    }
}

fn stop_requested(changed: std::result::Result<(), watch::error::RecvError>, stop_rx: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *stop_rx.borrow()
}

async fn run_ingest_loop(
    ctx: Arc<PipelineContext>,
    mut records: mpsc::Receiver<RawChangeRecord>,
    events: mpsc::Sender<SemanticEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    debug!("File system event ingest started");
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if stop_requested(changed, &stop_rx) {
                    break;
                }
            }
            record = records.recv() => match record {
                Some(record) => ctx.ingest(record, &events),
                None => break,
            },
        }
    }
    debug!("File system event ingest stopped");
}

fn batch_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_dispatch_loop(
    ctx: Arc<PipelineContext>,
    mut events: mpsc::Receiver<SemanticEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut scheduler = PriorityBatchScheduler::new();
    let mut period = ctx.config().batch_timeout();
    let mut ticker = batch_ticker(period);

    debug!("Event dispatcher started");
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if stop_requested(changed, &stop_rx) {
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let config = ctx.config();
                if config.batch_timeout() != period {
                    period = config.batch_timeout();
                    ticker = batch_ticker(period);
                }
                if !config.batch_enabled {
                    // Batching may have been switched off by a reload
                    if let Some(batch) = scheduler.flush(&config.priorities) {
                        ctx.deliver_batch(batch);
                    }
                    ctx.deliver(event);
                    continue;
                }
                if let Some(batch) = scheduler.push(event, config.batch_size, &config.priorities) {
                    ctx.deliver_batch(batch);
                    ticker.reset();
                }
            }
            _ = ticker.tick() => {
                if let Some(batch) = scheduler.flush(&ctx.config().priorities) {
                    ctx.deliver_batch(batch);
                }
            }
        }
    }

    // Deliver whatever was already queued, then the pending batch
    let config = ctx.config();
    while let Ok(event) = events.try_recv() {
        if config.batch_enabled {
            if let Some(batch) = scheduler.push(event, config.batch_size, &config.priorities) {
                ctx.deliver_batch(batch);
            }
        } else {
            ctx.deliver(event);
        }
    }
    if let Some(batch) = scheduler.flush(&config.priorities) {
        ctx.deliver_batch(batch);
    }
    debug!("Event dispatcher stopped");
}

async fn run_control_loop(
    ctx: Arc<PipelineContext>,
    mut failures: mpsc::Receiver<BackendFailure>,
    mut reloads: mpsc::Receiver<()>,
    mut stop_rx: watch::Receiver<bool>,
) {
    debug!("Recovery and reload handler started");
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if stop_requested(changed, &stop_rx) {
                    break;
                }
            }
            Some(failure) = failures.recv() => ctx.handle_stream_failure(failure).await,
            Some(()) = reloads.recv() => {
                if let Err(e) = ctx.reload_from_file().await {
                    warn!("Configuration reload failed, keeping previous configuration: {}", e);
                }
            }
        }
    }
    debug!("Recovery and reload handler stopped");
}
