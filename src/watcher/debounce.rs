//! Per-(path, operation) debounce memory
//!
//! The map is bounded: once it grows past its capacity, entries older than the
//! sweep age are dropped, and if that is not enough the oldest entries go until
//! the map is back down to three quarters of its capacity. Sweeps therefore run
//! at most once per `capacity / 4` new keys under a sustained burst.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::watcher::types::ChangeOp;

/// Entries younger than this are never swept, whatever the debounce window
const MIN_SWEEP_AGE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Debouncer {
    last_seen: HashMap<(PathBuf, ChangeOp), Instant>,
    capacity: usize,
    sweeps: u64,
}

impl Debouncer {
    pub fn new(capacity: usize) -> Self {
        Self {
            last_seen: HashMap::new(),
            capacity: capacity.max(1),
            sweeps: 0,
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    /// Returns true when the record should be suppressed.
    ///
    /// A record passes when no entry exists for the exact key or the previous
    /// one is at least `window` old; passing records refresh the entry.
    pub fn should_suppress(&mut self, path: &Path, op: ChangeOp, window: Duration, now: Instant) -> bool {
        let key = (path.to_path_buf(), op);
        if let Some(last) = self.last_seen.get(&key)
            && now.saturating_duration_since(*last) < window
        {
            return true;
        }

        self.last_seen.insert(key, now);
        if self.last_seen.len() > self.capacity {
            self.sweep(now, sweep_age(window));
        }
        false
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Number of sweeps run since creation
    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    fn low_water(&self) -> usize {
        (self.capacity * 3 / 4).max(1)
    }

    fn sweep(&mut self, now: Instant, max_age: Duration) {
        self.sweeps += 1;
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < max_age);

        let low_water = self.low_water();
        if self.last_seen.len() > low_water {
            let excess = self.last_seen.len() - low_water;
            let mut by_age: Vec<_> = self
                .last_seen
                .iter()
                .map(|(key, seen)| (*seen, key.clone()))
                .collect();
            by_age.select_nth_unstable_by_key(excess - 1, |(seen, _)| *seen);
            for (_, key) in by_age.into_iter().take(excess) {
                self.last_seen.remove(&key);
            }
        }

        debug!(
            "Debounce sweep evicted {} entries ({} remain)",
            before - self.last_seen.len(),
            self.last_seen.len()
        );
    }
}

fn sweep_age(window: Duration) -> Duration {
    (window * 4).max(MIN_SWEEP_AGE)
}
