//! Append-only execution log
//!
//! One row per stage invocation. Rows are never updated or deleted.

use sqlx::{Row, SqlitePool};
use spindle_common::Result;

use super::parse_timestamp;
use crate::models::ExecutionLogEntry;

pub async fn append(pool: &SqlitePool, entry: &ExecutionLogEntry) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO execution_log (
            stage, started_at, finished_at, duration_ms,
            processed, inserted, skipped, failed, success, error_message
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.stage)
    .bind(entry.started_at.to_rfc3339())
    .bind(entry.finished_at.to_rfc3339())
    .bind(entry.duration_ms())
    .bind(entry.processed as i64)
    .bind(entry.inserted as i64)
    .bind(entry.skipped as i64)
    .bind(entry.failed as i64)
    .bind(entry.success)
    .bind(&entry.error_message)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Most recent entries for a stage, newest first
pub async fn recent(pool: &SqlitePool, stage: &str, limit: u32) -> Result<Vec<ExecutionLogEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT stage, started_at, finished_at, processed, inserted, skipped, failed,
               success, error_message
        FROM execution_log
        WHERE stage = ?
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(stage)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let started_at: String = row.get("started_at");
            let finished_at: String = row.get("finished_at");
            Ok(ExecutionLogEntry {
                stage: row.get("stage"),
                started_at: parse_timestamp(&started_at, "started_at")?,
                finished_at: parse_timestamp(&finished_at, "finished_at")?,
                processed: row.get::<i64, _>("processed") as usize,
                inserted: row.get::<i64, _>("inserted") as usize,
                skipped: row.get::<i64, _>("skipped") as usize,
                failed: row.get::<i64, _>("failed") as usize,
                success: row.get("success"),
                error_message: row.get("error_message"),
            })
        })
        .collect()
}
