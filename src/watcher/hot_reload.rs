//! Configuration hot reload
//!
//! Polls the configuration file once a second and compares a BLAKE3 digest
//! of its content. A changed digest sends a reload request; the control task
//! performs the reload so a malformed file never takes down the poller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::watcher::context::PipelineContext;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Content digest of a configuration file
pub fn fingerprint(content: &[u8]) -> blake3::Hash {
    blake3::hash(content)
}

#[derive(Debug)]
pub struct ConfigHotReloader {
    path: PathBuf,
    last: Option<blake3::Hash>,
    primed: bool,
}

impl ConfigHotReloader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
            primed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remember the current content without signalling. A missing file is
    /// remembered as missing, so its later appearance counts as a change.
    pub fn prime(&mut self) {
        self.last = fs::read(&self.path).ok().map(|bytes| fingerprint(&bytes));
        self.primed = true;
    }

    /// Read the file and report whether its fingerprint changed since the
    /// last observation. The first call only primes.
    pub fn poll(&mut self) -> Result<bool> {
        let bytes = fs::read(&self.path)?;
        let current = fingerprint(&bytes);
        if !self.primed {
            self.primed = true;
            self.last = Some(current);
            return Ok(false);
        }
        if self.last == Some(current) {
            return Ok(false);
        }
        debug!("Configuration fingerprint changed: {}", current.to_hex());
        self.last = Some(current);
        Ok(true)
    }
}

/// Poll loop over an already primed reloader. Runs until the stop signal fires.
pub(crate) async fn run_hot_reload_loop(
    ctx: Arc<PipelineContext>,
    mut reloader: ConfigHotReloader,
    reload_tx: mpsc::Sender<()>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Watching configuration file {}", reloader.path().display());

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !ctx.config().hot_reload {
                    continue;
                }
                match reloader.poll() {
                    Ok(true) => {
                        info!("Configuration file changed, requesting reload");
                        // A request already queued covers this change too
                        let _ = reload_tx.try_send(());
                    }
                    Ok(false) => {}
                    Err(e) => warn!(
                        "Could not read configuration file {}: {}",
                        reloader.path().display(),
                        e
                    ),
                }
            }
        }
    }
    debug!("Configuration poller stopped");
}
