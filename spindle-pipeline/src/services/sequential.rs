//! Sequential queue processor
//!
//! Strict one-at-a-time consumer of the import queue, intended for
//! destinations that accept a single external write per invocation.
//!
//! **Per invocation:**
//! 1. Take the single oldest `pending` record (none → `Idle`)
//! 2. Validate it; a malformed record fails permanently, no retry
//! 3. Claim it (`processing`) and call the generator exactly once
//! 4. `Created` → `completed`, `AlreadyExists` → `skipped`
//! 5. Error → `retry_count += 1`; back to `pending` below `max_retries`,
//!    otherwise `failed`
//! 6. Hold the configured delay before returning whenever a record was handled
//!
//! An invocation runs on its own task, so a caller that stops waiting never
//! leaves a claimed record behind. Claims older than the lease (crash between
//! claim and outcome) are returned to `pending` before the next selection.

use chrono::Utc;
use spindle_common::Error;
use serde::{Deserialize, Serialize};
use spindle_common::events::{EventBus, PipelineEvent};
use spindle_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::content_generator::{ContentGenerator, GenerationOutcome};
use crate::db::{content, import_queue};
use crate::models::{ImportQueueRecord, ImportStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SequentialOutcome {
    /// Nothing pending
    Idle,
    Completed { record_id: Uuid },
    Skipped { record_id: Uuid },
    /// Failed attempt; the record returns to `pending`
    Retrying {
        record_id: Uuid,
        retry_count: u32,
        error: String,
    },
    /// Retry budget exhausted or record invalid
    Failed { record_id: Uuid, error: String },
    /// Another invocation claimed the record first
    Contended { record_id: Uuid },
}

impl SequentialOutcome {
    pub fn handled_record(&self) -> bool {
        !matches!(self, SequentialOutcome::Idle | SequentialOutcome::Contended { .. })
    }

    pub fn record_id(&self) -> Option<Uuid> {
        match self {
            SequentialOutcome::Completed { record_id }
            | SequentialOutcome::Skipped { record_id }
            | SequentialOutcome::Retrying { record_id, .. }
            | SequentialOutcome::Failed { record_id, .. }
            | SequentialOutcome::Contended { record_id } => Some(*record_id),
            SequentialOutcome::Idle => None,
        }
    }

    pub fn status(&self) -> Option<ImportStatus> {
        match self {
            SequentialOutcome::Completed { .. } => Some(ImportStatus::Completed),
            SequentialOutcome::Skipped { .. } => Some(ImportStatus::Skipped),
            SequentialOutcome::Retrying { .. } => Some(ImportStatus::Pending),
            SequentialOutcome::Failed { .. } => Some(ImportStatus::Failed),
            SequentialOutcome::Idle | SequentialOutcome::Contended { .. } => None,
        }
    }
}

pub struct SequentialProcessor {
    db: SqlitePool,
    generator: Arc<dyn ContentGenerator>,
    event_bus: EventBus,
    hold: Duration,
    claim_lease: Duration,
    /// Serializes invocations within this process
    running: Mutex<()>,
}

impl SequentialProcessor {
    pub fn new(
        db: SqlitePool,
        generator: Arc<dyn ContentGenerator>,
        event_bus: EventBus,
        hold: Duration,
        claim_lease: Duration,
    ) -> Self {
        Self {
            db,
            generator,
            event_bus,
            hold,
            claim_lease,
            running: Mutex::new(()),
        }
    }

    /// Process at most one record
    pub async fn process_next(self: &Arc<Self>) -> Result<SequentialOutcome> {
        let processor = Arc::clone(self);
        tokio::spawn(async move { processor.process_exclusive().await })
            .await
            .map_err(|e| Error::Internal(format!("import queue task failed: {}", e)))?
    }

    /// Return every claimed record to `pending`
    ///
    /// Only safe while no invocation is running, i.e. at startup.
    pub async fn release_all_claims(&self) -> Result<u64> {
        let _guard = self.running.lock().await;
        let released = import_queue::release_claims(&self.db, Utc::now()).await?;
        if released > 0 {
            tracing::warn!(released, "Returned interrupted import records to the queue");
        }
        Ok(released)
    }

    async fn process_exclusive(&self) -> Result<SequentialOutcome> {
        let _guard = self.running.lock().await;

        let lease = chrono::Duration::from_std(self.claim_lease).unwrap_or_else(|_| chrono::Duration::zero());
        let released = import_queue::release_claims(&self.db, Utc::now() - lease).await?;
        if released > 0 {
            tracing::warn!(
                released,
                lease_ms = self.claim_lease.as_millis() as u64,
                "Returned expired import claims to the queue"
            );
        }

        let outcome = match import_queue::next_pending(&self.db).await? {
            Some(record) => self.process_record(record).await?,
            None => {
                tracing::debug!("Import queue empty");
                SequentialOutcome::Idle
            }
        };

        if outcome.handled_record() {
            if let (Some(record_id), Some(status)) = (outcome.record_id(), outcome.status()) {
                self.event_bus.emit_lossy(PipelineEvent::ImportRecordProcessed {
                    record_id,
                    status: status.as_str().to_string(),
                    timestamp: Utc::now(),
                });
            }

            if !self.hold.is_zero() {
                tracing::debug!(hold_ms = self.hold.as_millis() as u64, "Holding before next import");
                tokio::time::sleep(self.hold).await;
            }
        }

        Ok(outcome)
    }

    async fn process_record(&self, mut record: ImportQueueRecord) -> Result<SequentialOutcome> {
        match record.validate() {
            // The generator always receives the canonical id
            Ok(external_id) => record.external_id = external_id.to_string(),
            Err(reason) => {
                tracing::warn!(record_id = %record.id, error = %reason, "Invalid import record, failing without retry");
                import_queue::mark_terminal(&self.db, record.id, ImportStatus::Failed, Some(&reason))
                    .await?;
                return Ok(SequentialOutcome::Failed {
                    record_id: record.id,
                    error: reason,
                });
            }
        }

        if !import_queue::claim(&self.db, record.id).await? {
            tracing::debug!(record_id = %record.id, "Import record claimed elsewhere");
            return Ok(SequentialOutcome::Contended {
                record_id: record.id,
            });
        }

        tracing::info!(
            record_id = %record.id,
            external_id = %record.external_id,
            attempt = record.retry_count + 1,
            "Generating content for import record"
        );

        match self.generator.generate(&record).await {
            Ok(result) => {
                let status = match result {
                    GenerationOutcome::Created => ImportStatus::Completed,
                    GenerationOutcome::AlreadyExists => ImportStatus::Skipped,
                };
                import_queue::mark_terminal(&self.db, record.id, status, None).await?;

                if let Err(e) = content::record_content_item(
                    &self.db,
                    &record.subject,
                    &record.title,
                    Some(&record.external_id),
                )
                .await
                {
                    tracing::warn!(record_id = %record.id, error = %e, "Failed to record content item");
                }

                tracing::info!(record_id = %record.id, status = status.as_str(), "Import record processed");

                Ok(match result {
                    GenerationOutcome::Created => SequentialOutcome::Completed {
                        record_id: record.id,
                    },
                    GenerationOutcome::AlreadyExists => SequentialOutcome::Skipped {
                        record_id: record.id,
                    },
                })
            }
            Err(e) => {
                let error = e.to_string();
                let (status, retry_count) =
                    import_queue::record_failure(&self.db, record.id, &error).await?;

                if status == ImportStatus::Failed {
                    tracing::error!(
                        record_id = %record.id,
                        retry_count,
                        max_retries = record.max_retries,
                        error = %error,
                        "Import record failed permanently"
                    );
                    Ok(SequentialOutcome::Failed {
                        record_id: record.id,
                        error,
                    })
                } else {
                    tracing::warn!(
                        record_id = %record.id,
                        retry_count,
                        max_retries = record.max_retries,
                        error = %error,
                        "Generation failed, record returned to queue"
                    );
                    Ok(SequentialOutcome::Retrying {
                        record_id: record.id,
                        retry_count,
                        error,
                    })
                }
            }
        }
    }
}
