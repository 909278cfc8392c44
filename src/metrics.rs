//! Pipeline counters and latency tracking
//!
//! Counters are plain atomics so every stage can bump them without
//! contention. Timing lives behind its own mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Timing {
    started_at: DateTime<Utc>,
    started: Instant,
    last_event_at: Option<DateTime<Utc>>,
    total_latency: Duration,
    latency_samples: u64,
    peak_latency: Duration,
}

impl Timing {
    fn fresh() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            last_event_at: None,
            total_latency: Duration::ZERO,
            latency_samples: 0,
            peak_latency: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub struct Metrics {
    events_processed: AtomicU64,
    events_batched: AtomicU64,
    events_dropped: AtomicU64,
    events_debounced: AtomicU64,
    events_ignored: AtomicU64,
    paths_watched: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    restarts: AtomicU64,
    callback_panics: AtomicU64,
    timing: Mutex<Timing>,
}

/// Point-in-time copy of the metrics, safe to hand to health reporters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub events_batched: u64,
    pub events_dropped: u64,
    pub events_debounced: u64,
    pub events_ignored: u64,
    pub paths_watched: u64,
    pub errors: u64,
    pub retries: u64,
    pub restarts: u64,
    pub callback_panics: u64,
    pub started_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub uptime_secs: f64,
    pub avg_latency_ms: f64,
    pub peak_latency_ms: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_processed: AtomicU64::new(0),
            events_batched: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_debounced: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
            paths_watched: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
            timing: Mutex::new(Timing::fresh()),
        }
    }

    /// An event reached the dispatcher `latency` after its raw record was normalized
    pub fn record_processed(&self, latency: Duration) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        let mut timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
        timing.last_event_at = Some(Utc::now());
        timing.total_latency += latency;
        timing.latency_samples += 1;
        if latency > timing.peak_latency {
            timing.peak_latency = latency;
        }
    }

    pub fn record_batched(&self, count: usize) {
        self.events_batched.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_debounced(&self) {
        self.events_debounced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_paths_watched(&self, count: usize) {
        self.paths_watched.store(count as u64, Ordering::Relaxed);
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
        let avg_latency_ms = if timing.latency_samples == 0 {
            0.0
        } else {
            timing.total_latency.as_secs_f64() * 1000.0 / timing.latency_samples as f64
        };

        MetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_batched: self.events_batched.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_debounced: self.events_debounced.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            paths_watched: self.paths_watched.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            started_at: timing.started_at,
            last_event_at: timing.last_event_at,
            uptime_secs: timing.started.elapsed().as_secs_f64(),
            avg_latency_ms,
            peak_latency_ms: timing.peak_latency.as_secs_f64() * 1000.0,
        }
    }

    /// Zero every counter and restart the clock. `paths_watched` is a gauge and is kept.
    pub fn reset(&self) {
        for counter in [
            &self.events_processed,
            &self.events_batched,
            &self.events_dropped,
            &self.events_debounced,
            &self.events_ignored,
            &self.errors,
            &self.retries,
            &self.restarts,
            &self.callback_panics,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.timing.lock().unwrap_or_else(PoisonError::into_inner) = Timing::fresh();
    }
}
