//! Event types for the Spindle event system
//!
//! Pipeline stages emit events on the EventBus; the HTTP layer forwards them
//! to SSE clients. Nothing in the pipeline depends on an event being received,
//! the database rows remain the source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Discovery finished for one subject
    DiscoveryCompleted {
        subject: String,
        discovered: usize,
        inserted: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },

    /// Promotion run finished
    PromotionCompleted {
        inserted: usize,
        skipped: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// All items of a batch have been attempted
    BatchDispatched {
        batch_id: Uuid,
        total: usize,
        started: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A child job reported its outcome
    QueueItemUpdated {
        batch_id: Uuid,
        item_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// Completion monitor wrote the final batch status
    BatchFinalized {
        batch_id: Uuid,
        status: String,
        completed: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Completion monitor gave up after its iteration cap
    BatchStalled {
        batch_id: Uuid,
        poll_iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// Operator cancelled the completion monitor
    BatchCancelled {
        batch_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Sequential processor handled one import record
    ImportRecordProcessed {
        record_id: Uuid,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::DiscoveryCompleted { .. } => "DiscoveryCompleted",
            PipelineEvent::PromotionCompleted { .. } => "PromotionCompleted",
            PipelineEvent::BatchDispatched { .. } => "BatchDispatched",
            PipelineEvent::QueueItemUpdated { .. } => "QueueItemUpdated",
            PipelineEvent::BatchFinalized { .. } => "BatchFinalized",
            PipelineEvent::BatchStalled { .. } => "BatchStalled",
            PipelineEvent::BatchCancelled { .. } => "BatchCancelled",
            PipelineEvent::ImportRecordProcessed { .. } => "ImportRecordProcessed",
        }
    }
}

/// Broadcast bus shared by all pipeline stages
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
