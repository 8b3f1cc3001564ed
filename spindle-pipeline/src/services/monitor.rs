//! Background completion monitor
//!
//! Polls a batch's queue items until every item is terminal, then writes the
//! final batch status exactly once. Progress (`poll_iterations`,
//! `next_poll_at`) is persisted on every poll so a restarted service resumes
//! the same monitor instead of abandoning the batch.
//!
//! **Exits:**
//! - all items terminal → `completed` / `completed_with_errors` / `failed`
//! - iteration cap reached → `stalled`
//! - operator cancel → `cancelled` (written by the registry)
//! - service shutdown → nothing written, resumed on next start

use chrono::{DateTime, Utc};
use serde::Serialize;
use spindle_common::events::{EventBus, PipelineEvent};
use spindle_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::dispatcher::synthetic_failure_id;
use crate::config::PipelineTimings;
use crate::db::batches;
use crate::models::{Batch, BatchStatus, QueueItemStatus};

/// Item type recorded for work items lost to an interrupted dispatch
const INTERRUPTED_ITEM_TYPE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub max_iterations: u32,
}

impl MonitorConfig {
    pub fn from_timings(timings: &PipelineTimings) -> Self {
        Self {
            poll_interval: timings.monitor_poll_interval,
            max_iterations: timings.monitor_max_iterations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MonitorOutcome {
    Finalized { status: BatchStatus },
    Stalled { poll_iterations: u32 },
    Cancelled,
    /// Service shutting down; the batch stays `processing`
    Interrupted,
    /// Another writer closed the batch first
    AlreadyClosed,
}

/// Watcher for a single batch
pub struct CompletionMonitor {
    db: SqlitePool,
    event_bus: EventBus,
    config: MonitorConfig,
    batch_id: Uuid,
    start_iteration: u32,
    first_delay: Duration,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl CompletionMonitor {
    /// Poll until the batch reaches a final state
    ///
    /// Database failures never end the monitor: a failed read or write is
    /// logged and retried on the next interval.
    pub async fn run(self) -> MonitorOutcome {
        let mut iterations = self.start_iteration;
        let mut delay = self.first_delay;

        tracing::info!(
            batch_id = %self.batch_id,
            start_iteration = iterations,
            max_iterations = self.config.max_iterations,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Completion monitor started"
        );

        loop {
            let exhausted = iterations >= self.config.max_iterations;
            if exhausted {
                match self.stall(iterations).await {
                    Ok(outcome) => return outcome,
                    Err(e) => {
                        tracing::warn!(batch_id = %self.batch_id, error = %e, "Failed to mark batch stalled, will retry next interval")
                    }
                }
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!(batch_id = %self.batch_id, "Completion monitor cancelled");
                    return MonitorOutcome::Cancelled;
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!(batch_id = %self.batch_id, iterations, "Completion monitor interrupted by shutdown");
                    return MonitorOutcome::Interrupted;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.config.poll_interval;

            if exhausted {
                continue;
            }
            iterations += 1;

            let counts = match batches::count_items(&self.db, self.batch_id).await {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::warn!(batch_id = %self.batch_id, iterations, error = %e, "Poll failed, will retry next interval");
                    continue;
                }
            };

            let next_poll_at = next_poll_at(self.config.poll_interval);
            if let Err(e) = batches::record_poll(&self.db, self.batch_id, iterations, next_poll_at).await {
                tracing::warn!(batch_id = %self.batch_id, error = %e, "Failed to persist poll progress");
            }

            tracing::debug!(
                batch_id = %self.batch_id,
                iterations,
                total = counts.total,
                completed = counts.completed,
                failed = counts.failed,
                processing = counts.processing,
                "Batch polled"
            );

            if let Some(status) = BatchStatus::from_counts(counts.total, counts.completed, counts.failed) {
                let written = match batches::finalize_batch(
                    &self.db,
                    self.batch_id,
                    status,
                    counts.completed,
                    counts.failed,
                )
                .await
                {
                    Ok(written) => written,
                    Err(e) => {
                        tracing::warn!(batch_id = %self.batch_id, status = status.as_str(), error = %e, "Failed to finalize batch, will retry next interval");
                        continue;
                    }
                };

                if !written {
                    return MonitorOutcome::AlreadyClosed;
                }

                tracing::info!(
                    batch_id = %self.batch_id,
                    status = status.as_str(),
                    completed = counts.completed,
                    failed = counts.failed,
                    "Batch finalized"
                );

                self.event_bus.emit_lossy(PipelineEvent::BatchFinalized {
                    batch_id: self.batch_id,
                    status: status.as_str().to_string(),
                    completed: counts.completed,
                    failed: counts.failed,
                    timestamp: Utc::now(),
                });

                return MonitorOutcome::Finalized { status };
            }
        }
    }

    async fn stall(&self, iterations: u32) -> Result<MonitorOutcome> {
        if !batches::close_batch(&self.db, self.batch_id, BatchStatus::Stalled).await? {
            return Ok(MonitorOutcome::AlreadyClosed);
        }

        tracing::warn!(
            batch_id = %self.batch_id,
            poll_iterations = iterations,
            "Batch did not complete within the polling budget, marked stalled"
        );

        self.event_bus.emit_lossy(PipelineEvent::BatchStalled {
            batch_id: self.batch_id,
            poll_iterations: iterations,
            timestamp: Utc::now(),
        });

        Ok(MonitorOutcome::Stalled {
            poll_iterations: iterations,
        })
    }
}

fn next_poll_at(interval: Duration) -> DateTime<Utc> {
    let interval = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + interval
}

struct MonitorHandle {
    /// Distinguishes a replacement monitor from the one it replaced
    monitor_id: Uuid,
    cancel: CancellationToken,
}

/// Supervised handles for running monitors
///
/// Cloning shares the same registry.
#[derive(Clone)]
pub struct MonitorRegistry {
    db: SqlitePool,
    event_bus: EventBus,
    config: MonitorConfig,
    tokens: Arc<RwLock<HashMap<Uuid, MonitorHandle>>>,
    shutdown: CancellationToken,
}

impl MonitorRegistry {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: MonitorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            event_bus,
            config,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    /// Start monitoring a freshly dispatched batch
    pub async fn spawn(&self, batch_id: Uuid) -> JoinHandle<()> {
        self.spawn_from(batch_id, 0, self.config.poll_interval).await
    }

    /// Resume a persisted monitor, honoring its `next_poll_at`
    pub async fn resume(&self, batch: &Batch) -> JoinHandle<()> {
        let first_delay = batch
            .next_poll_at
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .map_or(Duration::ZERO, |remaining| remaining.min(self.config.poll_interval));

        self.spawn_from(batch.id, batch.poll_iterations, first_delay).await
    }

    /// Resume a monitor for every batch still `processing`
    ///
    /// Startup only: a batch whose dispatch pass never recorded its summary
    /// was interrupted mid-dispatch, and the items that never got a row are
    /// written as failed so the batch can still finalize.
    pub async fn resume_all(&self) -> Result<usize> {
        let processing = batches::list_processing(&self.db).await?;
        let mut resumed = 0;

        for batch in &processing {
            if self.is_running(batch.id).await {
                continue;
            }
            if batch.summary.is_none() {
                self.settle_interrupted_dispatch(batch).await?;
            }
            tracing::info!(
                batch_id = %batch.id,
                poll_iterations = batch.poll_iterations,
                "Resuming completion monitor"
            );
            self.resume(batch).await;
            resumed += 1;
        }

        Ok(resumed)
    }

    async fn settle_interrupted_dispatch(&self, batch: &Batch) -> Result<()> {
        let items = batches::list_items(&self.db, batch.id).await?;
        let started = items
            .iter()
            .filter(|item| item.status != QueueItemStatus::Failed)
            .count();
        let timestamp_ms = Utc::now().timestamp_millis();

        for index in items.len()..batch.total {
            batches::insert_queue_item(
                &self.db,
                batch.id,
                &synthetic_failure_id(timestamp_ms, index),
                INTERRUPTED_ITEM_TYPE,
                QueueItemStatus::Failed,
                Some("dispatch interrupted before this item was started"),
            )
            .await?;
        }

        let missing = batch.total.saturating_sub(items.len());
        let mut summary = format!("{} of {} jobs started", started, batch.total);
        if missing > 0 {
            summary.push_str(" (dispatch interrupted)");
            tracing::warn!(
                batch_id = %batch.id,
                started,
                missing,
                "Batch dispatch was interrupted, unstarted items marked failed"
            );
        }
        batches::record_dispatch(&self.db, batch.id, started, &summary).await?;
        Ok(())
    }

    async fn spawn_from(
        &self,
        batch_id: Uuid,
        start_iteration: u32,
        first_delay: Duration,
    ) -> JoinHandle<()> {
        let cancel = CancellationToken::new();
        let monitor_id = Uuid::new_v4();
        {
            let mut tokens = self.tokens.write().await;
            let handle = MonitorHandle {
                monitor_id,
                cancel: cancel.clone(),
            };
            if let Some(previous) = tokens.insert(batch_id, handle) {
                // One monitor per batch
                previous.cancel.cancel();
            }
        }

        let monitor = CompletionMonitor {
            db: self.db.clone(),
            event_bus: self.event_bus.clone(),
            config: self.config,
            batch_id,
            start_iteration,
            first_delay,
            cancel: cancel.clone(),
            shutdown: self.shutdown.clone(),
        };

        let tokens = Arc::clone(&self.tokens);
        tokio::spawn(async move {
            let outcome = monitor.run().await;
            tracing::debug!(batch_id = %batch_id, outcome = ?outcome, "Completion monitor exited");

            let mut tokens = tokens.write().await;
            if tokens.get(&batch_id).map_or(false, |h| h.monitor_id == monitor_id) {
                tokens.remove(&batch_id);
            }
        })
    }

    /// Operator abort
    ///
    /// Stops the running monitor (if any) and marks the batch `cancelled`.
    /// Returns `false` when the batch is not `processing`.
    pub async fn cancel(&self, batch_id: Uuid) -> Result<bool> {
        if let Some(handle) = self.tokens.write().await.remove(&batch_id) {
            handle.cancel.cancel();
        }

        let written = batches::close_batch(&self.db, batch_id, BatchStatus::Cancelled).await?;
        if written {
            tracing::info!(batch_id = %batch_id, "Batch cancelled by operator");
            self.event_bus.emit_lossy(PipelineEvent::BatchCancelled {
                batch_id,
                timestamp: Utc::now(),
            });
        }

        Ok(written)
    }

    pub async fn is_running(&self, batch_id: Uuid) -> bool {
        self.tokens.read().await.contains_key(&batch_id)
    }

    pub async fn active_count(&self) -> usize {
        self.tokens.read().await.len()
    }
}
