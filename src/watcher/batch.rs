//! Priority batching
//!
//! Events accumulate until the batch is full or the flush timer fires. A
//! flushed batch is stable-sorted by kind priority, so equal-priority events
//! keep their arrival order.

use chrono::{DateTime, Utc};

use crate::watcher::types::{PriorityMap, SemanticEvent};

/// Events released together, already in delivery order
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub events: Vec<SemanticEvent>,
    pub created_at: DateTime<Utc>,
}

impl EventBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PriorityBatchScheduler {
    buffer: Vec<SemanticEvent>,
    opened_at: Option<DateTime<Utc>>,
}

impl PriorityBatchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an event, returning the flushed batch once `max_size` is reached
    pub fn push(&mut self, event: SemanticEvent, max_size: usize, priorities: &PriorityMap) -> Option<EventBatch> {
        if self.buffer.is_empty() {
            self.opened_at = Some(Utc::now());
        }
        self.buffer.push(event);
        if self.buffer.len() >= max_size.max(1) {
            self.flush(priorities)
        } else {
            None
        }
    }

    /// Release whatever is buffered. Returns `None` for an empty buffer.
    pub fn flush(&mut self, priorities: &PriorityMap) -> Option<EventBatch> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut events = std::mem::take(&mut self.buffer);
        prioritize(&mut events, priorities);
        Some(EventBatch {
            events,
            created_at: self.opened_at.take().unwrap_or_else(Utc::now),
        })
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Stable sort by kind priority, lowest number first
pub fn prioritize(events: &mut [SemanticEvent], priorities: &PriorityMap) {
    events.sort_by_key(|event| priorities.priority(event.kind));
}
