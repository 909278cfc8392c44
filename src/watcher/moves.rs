//! Best-effort move detection
//!
//! Removed and renamed paths leave a trail marker. A create whose base name
//! matches a fresh marker is reported as a move from the marked path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a removed path stays eligible as a move source
pub const MOVE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct MoveTracker {
    markers: HashMap<PathBuf, Instant>,
    window: Duration,
}

impl Default for MoveTracker {
    fn default() -> Self {
        Self::new(MOVE_WINDOW)
    }
}

impl MoveTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            markers: HashMap::new(),
            window,
        }
    }

    pub fn record(&mut self, path: &Path, now: Instant) {
        self.markers.insert(path.to_path_buf(), now);
    }

    /// Consume the freshest marker sharing `path`'s base name.
    ///
    /// Expired markers are purged first, whether or not anything matches.
    pub fn take_match(&mut self, path: &Path, now: Instant) -> Option<PathBuf> {
        let window = self.window;
        self.markers
            .retain(|_, marked| now.saturating_duration_since(*marked) <= window);

        let name = path.file_name()?;
        let source = self
            .markers
            .iter()
            .filter(|(marked, _)| marked.file_name() == Some(name))
            .max_by_key(|(_, at)| **at)
            .map(|(marked, _)| marked.clone())?;

        self.markers.remove(&source);
        debug!("Matched move {} -> {}", source.display(), path.display());
        Some(source)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
