//! Invalidation events and the in-memory FIFO queue.
//!
//! Events are published by write paths (usually through the trigger
//! facade) and consumed exactly once by the engine's drain loop. They are
//! transient: nothing is persisted and nothing can be cancelled once
//! enqueued.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::lock::mutex_lock;

const SOURCE: &str = "events";

/// A domain mutation notice. `trigger` is matched against rule triggers
/// by exact equality.
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    /// Unique identifier for log correlation.
    pub id: Uuid,
    pub trigger: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: OffsetDateTime,
    pub metadata: Option<Value>,
}

impl InvalidationEvent {
    pub fn new(trigger: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger: trigger.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            user_id: None,
            timestamp: OffsetDateTime::now_utc(),
            metadata: None,
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// FIFO queue feeding the single-flight drain loop.
///
/// A plain mutex is enough: contention is low and every hold is short.
pub struct EventQueue {
    queue: Mutex<VecDeque<InvalidationEvent>>,
    sequence: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: InvalidationEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        debug!(
            event_id = %event.id,
            sequence,
            trigger = %event.trigger,
            "Invalidation event enqueued"
        );
        mutex_lock(&self.queue, SOURCE, "publish").push_back(event);
    }

    /// Take the oldest pending event.
    pub fn pop(&self) -> Option<InvalidationEvent> {
        mutex_lock(&self.queue, SOURCE, "pop").pop_front()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
