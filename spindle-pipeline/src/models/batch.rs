//! Batches of generation jobs and their per-item queue rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Batch lifecycle
///
/// `processing` is the only non-terminal state. `stalled` is written when the
/// completion monitor exhausts its iteration cap, `cancelled` when an operator
/// aborts the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
    Stalled,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::CompletedWithErrors => "completed_with_errors",
            BatchStatus::Failed => "failed",
            BatchStatus::Stalled => "stalled",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Processing)
    }

    /// Final status once every item is terminal, `None` while work remains
    ///
    /// All failed → `Failed`; some failed → `CompletedWithErrors`;
    /// none failed → `Completed`.
    pub fn from_counts(total: usize, completed: usize, failed: usize) -> Option<BatchStatus> {
        if completed + failed < total {
            return None;
        }

        if total > 0 && failed == total {
            Some(BatchStatus::Failed)
        } else if failed > 0 {
            Some(BatchStatus::CompletedWithErrors)
        } else {
            Some(BatchStatus::Completed)
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "completed_with_errors" => Ok(BatchStatus::CompletedWithErrors),
            "failed" => Ok(BatchStatus::Failed),
            "stalled" => Ok(BatchStatus::Stalled),
            "cancelled" => Ok(BatchStatus::Cancelled),
            other => Err(format!("unknown batch status '{}'", other)),
        }
    }
}

/// Aggregate of queue items dispatched together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub status: BatchStatus,
    pub total: usize,
    /// Child jobs actually started
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub summary: Option<String>,
    /// Persisted so a restarted monitor resumes instead of starting over
    pub poll_iterations: u32,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Child job status as tracked in `queue_items`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueItemStatus::Completed | QueueItemStatus::Failed)
    }
}

impl FromStr for QueueItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueItemStatus::Pending),
            "processing" => Ok(QueueItemStatus::Processing),
            "completed" => Ok(QueueItemStatus::Completed),
            "failed" => Ok(QueueItemStatus::Failed),
            other => Err(format!("unknown queue item status '{}'", other)),
        }
    }
}

/// One dispatched (or failed-to-dispatch) child job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// Child job identifier, or `failed-{timestamp}-{index}` when the start failed
    pub item_id: String,
    pub item_type: String,
    pub status: QueueItemStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// A unit of work submitted in a batch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub item_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Item counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}
