//! Subscriber callback dispatch
//!
//! Every callback runs on its own blocking task behind `catch_unwind`, so a
//! panicking subscriber is logged and counted without touching its siblings
//! or the pipeline. Dispatch never waits for callbacks to finish.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::watcher::types::{EventKind, SemanticEvent};

pub type EventCallback = Arc<dyn Fn(&SemanticEvent) + Send + Sync + 'static>;

#[derive(Default)]
pub struct CallbackDispatcher {
    callbacks: RwLock<HashMap<EventKind, Vec<EventCallback>>>,
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = callbacks.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("CallbackDispatcher")
            .field("callbacks", &counts)
            .finish()
    }
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber for `kind`. Duplicates are allowed and each is invoked.
    pub fn register<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&SemanticEvent) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn callback_count(&self, kind: EventKind) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Schedule every callback registered for the event's kind.
    ///
    /// Must be called from within a Tokio runtime. Returns the number of
    /// invocations scheduled.
    pub fn dispatch(&self, event: SemanticEvent, metrics: &Arc<Metrics>) -> usize {
        let subscribers: Vec<EventCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        metrics.record_processed(event.detected_at.elapsed());

        if subscribers.is_empty() {
            debug!("No subscribers for {}", event);
            return 0;
        }

        let event = Arc::new(event);
        for callback in &subscribers {
            let callback = Arc::clone(callback);
            let event = Arc::clone(&event);
            let metrics = Arc::clone(metrics);
            tokio::task::spawn_blocking(move || {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                    metrics.record_callback_panic();
                    warn!(
                        "Callback for {} panicked: {}",
                        event,
                        panic_message(panic.as_ref())
                    );
                }
            });
        }
        subscribers.len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
