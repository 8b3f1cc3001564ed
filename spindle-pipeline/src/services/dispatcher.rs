//! Batch dispatcher
//!
//! Starts one child job per work item, in order, through the retry wrapper.
//! Every item gets a queue row, including items whose start failed, so the
//! batch totals always add up. Returns once dispatch is done; completion is
//! tracked by a `CompletionMonitor` spawned through the registry.
//!
//! The dispatch pass runs on its own task. A caller that stops waiting (a
//! disconnected HTTP client, a timeout) does not stop the pass: every item
//! still gets its row and the monitor is still spawned.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use spindle_common::events::{EventBus, PipelineEvent};
use spindle_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use super::job_launcher::JobLauncher;
use super::monitor::MonitorRegistry;
use super::rate_limiter::ApiRateLimiter;
use super::retry::{invoke_with_retry, RetryPolicy};
use crate::config::MAX_BATCH_SIZE;
use crate::db::batches;
use crate::models::{QueueItemStatus, WorkItem};

/// Outcome of one dispatch pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub batch_id: Uuid,
    pub total: usize,
    pub started: usize,
    pub failed: usize,
}

/// Identifier recorded for an item whose start never succeeded
pub fn synthetic_failure_id(timestamp_ms: i64, index: usize) -> String {
    format!("failed-{}-{}", timestamp_ms, index)
}

pub struct BatchDispatcher {
    db: SqlitePool,
    launcher: Arc<dyn JobLauncher>,
    limiter: Arc<ApiRateLimiter>,
    retry: RetryPolicy,
    event_bus: EventBus,
    monitors: MonitorRegistry,
}

impl BatchDispatcher {
    pub fn new(
        db: SqlitePool,
        launcher: Arc<dyn JobLauncher>,
        limiter: Arc<ApiRateLimiter>,
        retry: RetryPolicy,
        event_bus: EventBus,
        monitors: MonitorRegistry,
    ) -> Self {
        Self {
            db,
            launcher,
            limiter,
            retry,
            event_bus,
            monitors,
        }
    }

    /// Dispatch `items` as one batch and return once every item has a row
    pub async fn dispatch(self: &Arc<Self>, items: Vec<WorkItem>) -> Result<DispatchReport> {
        validate_items(&items)?;

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.run(items).await })
            .await
            .map_err(|e| Error::Internal(format!("dispatch task failed: {}", e)))?
    }

    async fn run(&self, items: Vec<WorkItem>) -> Result<DispatchReport> {
        let batch = batches::create_batch(&self.db, items.len()).await?;
        tracing::info!(batch_id = %batch.id, total = batch.total, "Dispatching batch");

        let mut started = 0;
        let mut failed = 0;

        for (index, item) in items.iter().enumerate() {
            self.limiter.acquire().await;

            let result = invoke_with_retry("start child job", &self.retry, || {
                self.launcher.start_job(item)
            })
            .await;

            match result {
                Ok(job_id) => {
                    let inserted = batches::insert_queue_item(
                        &self.db,
                        batch.id,
                        &job_id,
                        &item.item_type,
                        QueueItemStatus::Processing,
                        None,
                    )
                    .await;

                    match inserted {
                        Ok(_) => {
                            started += 1;
                            tracing::debug!(batch_id = %batch.id, index, job_id = %job_id, "Child job started");
                        }
                        Err(e) if e.is_unique_violation() => {
                            let message = format!("job id {} already tracked in this batch", job_id);
                            self.record_failed_start(batch.id, index, item, &message).await?;
                            failed += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    self.record_failed_start(batch.id, index, item, &message).await?;
                    failed += 1;
                }
            }
        }

        let summary = format!("{} of {} jobs started", started, batch.total);
        batches::record_dispatch(&self.db, batch.id, started, &summary).await?;

        self.event_bus.emit_lossy(PipelineEvent::BatchDispatched {
            batch_id: batch.id,
            total: batch.total,
            started,
            failed,
            timestamp: Utc::now(),
        });

        self.monitors.spawn(batch.id).await;

        tracing::info!(batch_id = %batch.id, started, failed, summary = %summary, "Batch dispatched");

        Ok(DispatchReport {
            batch_id: batch.id,
            total: batch.total,
            started,
            failed,
        })
    }

    async fn record_failed_start(
        &self,
        batch_id: Uuid,
        index: usize,
        item: &WorkItem,
        message: &str,
    ) -> Result<()> {
        let item_id = synthetic_failure_id(Utc::now().timestamp_millis(), index);
        batches::insert_queue_item(
            &self.db,
            batch_id,
            &item_id,
            &item.item_type,
            QueueItemStatus::Failed,
            Some(message),
        )
        .await?;

        tracing::warn!(
            batch_id = %batch_id,
            index,
            item_id = %item_id,
            error = %message,
            "Child job could not be started"
        );
        Ok(())
    }
}

fn validate_items(items: &[WorkItem]) -> Result<()> {
    if items.is_empty() {
        return Err(Error::InvalidInput("batch must contain at least one item".into()));
    }
    if items.len() > MAX_BATCH_SIZE as usize {
        return Err(Error::InvalidInput(format!(
            "batch of {} items exceeds the limit of {}",
            items.len(),
            MAX_BATCH_SIZE
        )));
    }
    if let Some(index) = items.iter().position(|i| i.item_type.trim().is_empty()) {
        return Err(Error::InvalidInput(format!("item {} has an empty item_type", index)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_failure_id_format() {
        assert_eq!(synthetic_failure_id(1_700_000_000_123, 1), "failed-1700000000123-1");
    }

    #[test]
    fn test_blank_item_type_is_rejected() {
        let items = vec![WorkItem {
            item_type: "  ".to_string(),
            payload: serde_json::Value::Null,
        }];
        assert!(matches!(validate_items(&items), Err(Error::InvalidInput(_))));
    }
}
