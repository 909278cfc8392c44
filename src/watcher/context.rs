//! Shared pipeline state
//!
//! One `PipelineContext` is owned by the `FileWatcher` and handed to each task
//! through an `Arc`. Every structure carries its own lock so updates to the
//! registry, normalizer state, metrics and config never contend with each
//! other. The backend handle sits behind an async mutex that add/remove and
//! restart all take, so nobody operates on a handle that is being replaced.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{Mutex as TokioMutex, MutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, WatchError};
use crate::metrics::Metrics;
use crate::watcher::backend::{BackendFactory, BackendFailure, BackendSink, WatchBackend};
use crate::watcher::batch::EventBatch;
use crate::watcher::dispatch::CallbackDispatcher;
use crate::watcher::events::{EventNormalizer, Normalized};
use crate::watcher::filtering::PathFilter;
use crate::watcher::recovery::{ErrorRecoveryManager, RetryPolicy};
use crate::watcher::registry::{self, PathRegistry, WatchedPath};
use crate::watcher::types::{ChangeOp, RawChangeRecord, SemanticEvent};

/// Capacity of the backend failure channel; one pending failure is enough to restart
const FAILURE_QUEUE_CAPACITY: usize = 16;

pub(crate) struct BackendHandle {
    pub(crate) backend: Box<dyn WatchBackend>,
    pub(crate) generation: u64,
}

struct SinkChannels {
    records: mpsc::Sender<RawChangeRecord>,
    errors: mpsc::Sender<BackendFailure>,
}

/// Receiving ends of the backend channels, consumed when the pipeline starts
pub(crate) struct PipelineReceivers {
    pub(crate) records: mpsc::Receiver<RawChangeRecord>,
    pub(crate) errors: mpsc::Receiver<BackendFailure>,
}

pub struct PipelineContext {
    config: RwLock<Arc<Config>>,
    filter: RwLock<Arc<PathFilter>>,
    pub(crate) registry: PathRegistry,
    pub(crate) normalizer: EventNormalizer,
    pub(crate) dispatcher: CallbackDispatcher,
    pub(crate) recovery: ErrorRecoveryManager,
    pub(crate) metrics: Arc<Metrics>,
    backend: TokioMutex<Option<BackendHandle>>,
    factory: Arc<dyn BackendFactory>,
    channels: Mutex<Option<SinkChannels>>,
    generation: AtomicU64,
    running: AtomicBool,
}

impl PipelineContext {
    /// Build the context and its first backend. Backend construction failures
    /// are setup errors and surface here.
    pub(crate) fn new(config: Config, factory: Arc<dyn BackendFactory>) -> Result<(Arc<Self>, PipelineReceivers)> {
        config.validate()?;
        let filter = PathFilter::from_config(&config)?;
        let normalizer = EventNormalizer::new(config.debounce_capacity);

        let ctx = Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            filter: RwLock::new(Arc::new(filter)),
            registry: PathRegistry::new(),
            normalizer,
            dispatcher: CallbackDispatcher::new(),
            recovery: ErrorRecoveryManager::new(),
            metrics: Arc::new(Metrics::new()),
            backend: TokioMutex::new(None),
            factory,
            channels: Mutex::new(None),
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
        });

        let receivers = ctx.open_channels();
        let handle = ctx.build_backend()?;
        *ctx.backend.try_lock().map_err(|_| WatchError::BackendUnavailable)? = Some(handle);
        Ok((ctx, receivers))
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn filter(&self) -> Arc<PathFilter> {
        Arc::clone(&self.filter.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn sync_path_gauge(&self) {
        self.metrics.set_paths_watched(self.registry.len());
    }

    pub(crate) async fn backend_slot(&self) -> MutexGuard<'_, Option<BackendHandle>> {
        self.backend.lock().await
    }

    /// Fresh bounded channels for a new pipeline run
    pub(crate) fn open_channels(&self) -> PipelineReceivers {
        let capacity = self.config().queue_capacity;
        let (records_tx, records_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(FAILURE_QUEUE_CAPACITY);
        *self.channels.lock().unwrap_or_else(PoisonError::into_inner) = Some(SinkChannels {
            records: records_tx,
            errors: errors_tx,
        });
        PipelineReceivers {
            records: records_rx,
            errors: errors_rx,
        }
    }

    /// Create a backend wired to the current channels under a new generation
    pub(crate) fn build_backend(&self) -> Result<BackendHandle> {
        let (records, errors) = {
            let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            let channels = channels.as_ref().ok_or(WatchError::NotRunning)?;
            (channels.records.clone(), channels.errors.clone())
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = BackendSink::new(records, errors, generation, Arc::clone(&self.metrics));
        let backend = self.factory.create(sink)?;
        debug!("Created watch backend generation {}", generation);
        Ok(BackendHandle { backend, generation })
    }

    /// Drop the backend and the channel senders so every task drains out
    pub(crate) async fn close_backend(&self) {
        self.backend.lock().await.take();
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn retry_policy(&self) -> RetryPolicy {
        if self.is_running() {
            RetryPolicy::from_config(&self.config())
        } else {
            RetryPolicy::once()
        }
    }

    /// Register `path`, expanding directories recursively when configured.
    ///
    /// Fails when the path does not exist or the backend rejects it. While
    /// the pipeline runs, backend rejections are retried first. With no
    /// backend (pipeline stopped) the paths are only recorded and get
    /// registered with the backend on the next start.
    pub async fn add_path(&self, path: &Path) -> Result<()> {
        self.register(path, None).await
    }

    /// `owner` is the registration root new entries belong to; `None` makes
    /// `path` its own root.
    async fn register(&self, path: &Path, owner: Option<PathBuf>) -> Result<()> {
        let target_root = registry::resolve_path(path)?;
        let root = owner.unwrap_or_else(|| target_root.clone());
        let recursive = self.config().recursive;
        let filter = self.filter();
        let targets = registry::enumerate(&target_root, recursive, &filter)?;
        let policy = self.retry_policy();

        let mut slot = self.backend.lock().await;
        if slot.is_none() && self.is_running() {
            return Err(WatchError::BackendUnavailable);
        }

        let mut added = 0;
        for target in targets {
            if self.registry.contains(&target) {
                continue;
            }
            if let Some(handle) = slot.as_mut() {
                let operation = format!("watch {}", target.display());
                self.recovery
                    .retry(&operation, policy, &self.metrics, || handle.backend.watch(&target))
                    .await?;
            }
            self.registry.insert(WatchedPath {
                path: target,
                recursive,
                root: root.clone(),
            });
            added += 1;
        }
        drop(slot);

        self.sync_path_gauge();
        info!("Watching {} ({} new paths)", target_root.display(), added);
        Ok(())
    }

    /// Stop watching `path` and everything its registration expanded into
    pub async fn remove_path(&self, path: &Path) -> Result<()> {
        if !self.is_running() {
            return Err(WatchError::NotRunning);
        }
        self.unregister(path).await
    }

    async fn unregister(&self, path: &Path) -> Result<()> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let doomed = self.registry.removal_set(&target);
        if doomed.is_empty() {
            return Err(WatchError::NotWatched(target));
        }
        let policy = self.retry_policy();

        let mut slot = self.backend.lock().await;
        for watched in doomed {
            if let Some(handle) = slot.as_mut() {
                let operation = format!("unwatch {}", watched.display());
                self.recovery
                    .retry(&operation, policy, &self.metrics, || {
                        match handle.backend.unwatch(&watched) {
                            Err(WatchError::WatchNotFound(_)) => Ok(()),
                            other => other,
                        }
                    })
                    .await?;
            }
            self.registry.remove(&watched);
        }
        drop(slot);

        self.sync_path_gauge();
        info!("Stopped watching {}", target.display());
        Ok(())
    }

    /// Filter, normalize and enqueue one raw record. Never blocks.
    pub(crate) fn ingest(self: &Arc<Self>, record: RawChangeRecord, events: &mpsc::Sender<SemanticEvent>) {
        let root = self.registry.root_for(&record.path);
        if self.filter().is_excluded(&record.path, &root) {
            debug!("Excluded {}", record.path.display());
            self.metrics.record_ignored();
            return;
        }

        // Directories are tracked before the extension allow-list can drop them
        self.track_directory(&record);

        let config = self.config();
        let event = match self.normalizer.normalize(&record, &config) {
            Normalized::Event(event) => event,
            Normalized::Ignored => {
                self.metrics.record_ignored();
                return;
            }
            Normalized::Debounced => {
                self.metrics.record_debounced();
                return;
            }
        };

        if let Err(e) = events.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    self.metrics.record_dropped();
                    warn!("Event queue full, dropping {}", event);
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("Event queue closed, pipeline shutting down");
                }
            }
        }
    }

    /// Keep the registry in step with directories appearing or vanishing
    /// under recursive registrations.
    fn track_directory(self: &Arc<Self>, record: &RawChangeRecord) {
        let op = record.op;
        if op.contains(ChangeOp::CREATE) && record.path.is_dir() {
            let Some(parent) = self.registry.recursive_parent(&record.path) else {
                return;
            };
            let ctx = Arc::clone(self);
            let path = record.path.clone();
            tokio::spawn(async move {
                if let Err(e) = ctx.register(&path, Some(parent.root)).await {
                    warn!("Failed to watch new directory {}: {}", path.display(), e);
                }
            });
        } else if (op.contains(ChangeOp::REMOVE) || op.contains(ChangeOp::RENAME))
            && self.registry.contains(&record.path)
        {
            let ctx = Arc::clone(self);
            let path = record.path.clone();
            tokio::spawn(async move { ctx.forget_vanished(&path).await });
        }
    }

    async fn forget_vanished(&self, path: &Path) {
        let vanished: Vec<PathBuf> = self
            .registry
            .list_paths()
            .into_iter()
            .filter(|p| p.starts_with(path))
            .collect();

        let mut slot = self.backend.lock().await;
        for watched in &vanished {
            if let Some(handle) = slot.as_mut() {
                // The backend usually dropped the watch with the directory
                let _ = handle.backend.unwatch(watched);
            }
            self.registry.remove(watched);
        }
        drop(slot);

        debug!("Forgot {} vanished paths under {}", vanished.len(), path.display());
        self.sync_path_gauge();
    }

    /// Dispatch every event of a flushed batch, in batch order
    pub(crate) fn deliver_batch(&self, batch: EventBatch) {
        debug!("Flushing batch of {} events", batch.len());
        self.metrics.record_batched(batch.len());
        for event in batch.events {
            self.dispatcher.dispatch(event, &self.metrics);
        }
    }

    pub(crate) fn deliver(&self, event: SemanticEvent) {
        self.dispatcher.dispatch(event, &self.metrics);
    }

    /// React to a stream failure from the backend
    pub(crate) async fn handle_stream_failure(&self, failure: BackendFailure) {
        if failure.generation != self.current_generation() {
            debug!(
                "Ignoring failure from stale backend generation {}: {}",
                failure.generation, failure.message
            );
            return;
        }

        self.metrics.record_error();
        warn!("Watch backend stream failed: {}", failure.message);

        if !self.config().recovery_enabled {
            warn!("Error recovery disabled, continuing without restart");
            return;
        }

        if let Err(e) = self.recovery.restart(self).await {
            warn!("Watch backend restart failed: {}", e);
        }
    }

    /// Swap in a new configuration wholesale.
    ///
    /// Debounce and move-tracking state carry over. Roots added to or removed
    /// from `watch_paths` are registered or unregistered; failures there are
    /// logged and do not undo the swap.
    pub async fn apply_config(&self, config: Config) -> Result<()> {
        config.validate()?;
        let filter = PathFilter::from_config(&config)?;
        let previous = self.config();

        *self.filter.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(filter);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config.clone());
        info!("Configuration replaced");

        for path in config.watch_paths.iter().filter(|p| !previous.watch_paths.contains(p)) {
            if let Err(e) = self.add_path(path).await {
                warn!("Failed to watch {} after reload: {}", path.display(), e);
            }
        }
        for path in previous.watch_paths.iter().filter(|p| !config.watch_paths.contains(p)) {
            if let Err(e) = self.unregister(path).await {
                warn!("Failed to unwatch {} after reload: {}", path.display(), e);
            }
        }
        Ok(())
    }

    /// Reload from the configured file, keeping the current config on any error
    pub async fn reload_from_file(&self) -> Result<()> {
        let current = self.config();
        let Some(path) = current.config_file.clone() else {
            return Err(WatchError::Config("no configuration file set".into()));
        };
        let mut next = Config::load(&path)?;
        next.config_file = Some(path);
        self.apply_config(next).await
    }
}
