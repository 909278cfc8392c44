//! Error recovery for the watch backend
//!
//! Two strategies:
//! - **Retry**: runtime add/remove operations are retried a bounded number of
//!   times with a fixed delay before the error reaches the caller.
//! - **Restart**: a stream-level failure throws the backend away, builds a new
//!   one and re-registers every path the registry holds.

use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, WatchError};
use crate::metrics::Metrics;
use crate::watcher::context::PipelineContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Healthy,
    Retrying,
    /// Also the resting state after a restart that could not build a backend
    Restarting,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecoveryState::Healthy => "healthy",
            RecoveryState::Retrying => "retrying",
            RecoveryState::Restarting => "restarting",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        if config.recovery_enabled {
            Self {
                max_attempts: config.max_retries.max(1),
                delay: config.retry_delay(),
            }
        } else {
            Self::once()
        }
    }

    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub struct ErrorRecoveryManager {
    state: RwLock<RecoveryState>,
}

impl Default for ErrorRecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRecoveryManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RecoveryState::Healthy),
        }
    }

    pub fn state(&self) -> RecoveryState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RecoveryState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
    ///
    /// Every failed attempt bumps the retry counter. Exhaustion bumps the
    /// error counter and returns `RetriesExhausted` wrapping the last error.
    /// A policy of a single attempt returns the error unwrapped.
    pub async fn retry<T, F>(&self, operation: &str, policy: RetryPolicy, metrics: &Metrics, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}/{}", operation, attempt, max_attempts);
                        self.set_state(RecoveryState::Healthy);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    // A single-attempt policy never retries, so nothing to count
                    if max_attempts > 1 {
                        metrics.record_retry();
                    }
                    if attempt >= max_attempts {
                        metrics.record_error();
                        if attempt > 1 {
                            self.set_state(RecoveryState::Healthy);
                        }
                        error!("{} failed after {} attempts: {}", operation, attempt, err);
                        if max_attempts == 1 {
                            return Err(err);
                        }
                        return Err(WatchError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    self.set_state(RecoveryState::Retrying);
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        operation, attempt, max_attempts, err, policy.delay
                    );
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Replace the backend and re-register every registry path.
    ///
    /// Paths the new backend rejects are logged and dropped from the registry,
    /// so they stay unwatched until added again. Returns the number of paths
    /// re-registered.
    pub async fn restart(&self, ctx: &PipelineContext) -> Result<usize> {
        self.set_state(RecoveryState::Restarting);
        info!("Restarting watch backend");

        let mut slot = ctx.backend_slot().await;
        if slot.take().is_some() {
            debug!("Discarded previous watch backend");
        }

        let mut handle = match ctx.build_backend() {
            Ok(handle) => handle,
            Err(e) => {
                ctx.metrics.record_error();
                error!("Failed to rebuild watch backend, pipeline is unwatched: {}", e);
                return Err(e);
            }
        };

        let mut restored = 0;
        for entry in ctx.registry.entries() {
            match handle.backend.watch(&entry.path) {
                Ok(()) => restored += 1,
                Err(e) => {
                    warn!(
                        "Could not re-register {} after restart: {}",
                        entry.path.display(),
                        e
                    );
                    ctx.registry.remove(&entry.path);
                }
            }
        }

        let generation = handle.generation;
        *slot = Some(handle);
        drop(slot);

        ctx.sync_path_gauge();
        ctx.metrics.record_restart();
        self.set_state(RecoveryState::Healthy);
        info!(
            "Watch backend restarted (generation {}) with {} paths",
            generation, restored
        );
        Ok(restored)
    }
}
