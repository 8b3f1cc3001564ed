//! Dedup & queue-promotion stage
//!
//! Scans pending candidates that carry artwork, drops those already known to
//! any destination in the `DedupIndex`, and promotes up to `batch_size`
//! survivors into the generation queue. Every invocation appends one
//! `execution_log` row, including runs that fail part way.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use spindle_common::events::{EventBus, PipelineEvent};
use spindle_common::Result;
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use super::dedup::DedupIndex;
use crate::db::{candidates, execution_log, generation_queue};
use crate::models::{CandidateStatus, ExecutionLogEntry};

pub const STAGE_NAME: &str = "promotion";

/// Counts reported by one promotion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionReport {
    /// Pending candidates loaded (at most `2 × batch_size`)
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Survivors beyond the cap, left for a later run
    pub left_pending: usize,
}

pub struct PromotionStage {
    db: SqlitePool,
    index: DedupIndex,
    event_bus: EventBus,
}

impl PromotionStage {
    pub fn new(db: SqlitePool, index: DedupIndex, event_bus: EventBus) -> Self {
        Self {
            db,
            index,
            event_bus,
        }
    }

    /// Run one promotion pass
    ///
    /// `batch_size` is expected to be clamped by the caller.
    pub async fn run(&self, batch_size: u32) -> Result<PromotionReport> {
        let started_at = Utc::now();
        let mut report = PromotionReport::default();

        let outcome = self.promote(batch_size.max(1), &mut report).await;

        let entry = ExecutionLogEntry {
            stage: STAGE_NAME.to_string(),
            started_at,
            finished_at: Utc::now(),
            processed: report.fetched,
            inserted: report.inserted,
            skipped: report.skipped,
            failed: report.failed,
            success: outcome.is_ok(),
            error_message: outcome.as_ref().err().map(|e| e.to_string()),
        };

        if let Err(e) = execution_log::append(&self.db, &entry).await {
            tracing::error!(stage = STAGE_NAME, error = %e, "Failed to append execution log entry");
        }

        outcome?;

        tracing::info!(
            batch_size,
            fetched = report.fetched,
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failed,
            left_pending = report.left_pending,
            duration_ms = entry.duration_ms(),
            "Promotion complete"
        );

        self.event_bus.emit_lossy(PipelineEvent::PromotionCompleted {
            inserted: report.inserted,
            skipped: report.skipped,
            failed: report.failed,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    async fn promote(&self, batch_size: u32, report: &mut PromotionReport) -> Result<()> {
        let pending = candidates::fetch_pending_with_artwork(&self.db, batch_size * 2).await?;
        report.fetched = pending.len();

        if pending.is_empty() {
            tracing::debug!("No pending candidates to promote");
            return Ok(());
        }

        let subject_keys: Vec<String> = pending
            .iter()
            .map(|c| c.dedup_key().subject_key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // Keys promoted during this run are added as we go
        let mut known = self.index.known_keys(&subject_keys).await?;
        tracing::debug!(
            sources = ?self.index.source_names(),
            subjects = subject_keys.len(),
            known = known.len(),
            "Dedup index loaded"
        );

        for candidate in pending {
            let key = candidate.dedup_key();

            if known.contains(&key) {
                candidates::set_status(&self.db, candidate.id, CandidateStatus::Skipped, None)
                    .await?;
                report.skipped += 1;
                tracing::debug!(
                    candidate_id = %candidate.id,
                    subject = %candidate.subject,
                    title = %candidate.title,
                    "Candidate already known downstream, skipped"
                );
                continue;
            }

            if report.inserted >= batch_size as usize {
                report.left_pending += 1;
                continue;
            }

            match generation_queue::insert_entry(&self.db, &candidate).await {
                Ok(entry_id) => {
                    candidates::set_status(&self.db, candidate.id, CandidateStatus::Queued, None)
                        .await?;
                    known.insert(key);
                    report.inserted += 1;
                    tracing::debug!(
                        candidate_id = %candidate.id,
                        entry_id = %entry_id,
                        "Candidate promoted to generation queue"
                    );
                }
                Err(e) if e.is_unique_violation() => {
                    // Concurrent run promoted the same key first
                    candidates::set_status(&self.db, candidate.id, CandidateStatus::Skipped, None)
                        .await?;
                    known.insert(key);
                    report.skipped += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(
                        candidate_id = %candidate.id,
                        error = %message,
                        "Promotion insert failed"
                    );
                    candidates::set_status(
                        &self.db,
                        candidate.id,
                        CandidateStatus::Failed,
                        Some(&message),
                    )
                    .await?;
                    report.failed += 1;
                }
            }
        }

        Ok(())
    }
}
