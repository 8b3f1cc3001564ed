//! Batch and queue item persistence

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use spindle_common::Result;
use uuid::Uuid;

use super::{now_rfc3339, parse_optional_timestamp, parse_status, parse_timestamp, parse_uuid};
use crate::models::{Batch, BatchStatus, QueueItem, QueueItemStatus, StatusCounts};

const BATCH_COLUMNS: &str = r#"
    id, status, total, dispatched, completed, failed, summary,
    poll_iterations, next_poll_at, created_at, completed_at
"#;

const ITEM_COLUMNS: &str = r#"
    id, batch_id, item_id, item_type, status, error_message, created_at, processed_at
"#;

/// Create a batch row in `processing` for `total` items
pub async fn create_batch(pool: &SqlitePool, total: usize) -> Result<Batch> {
    let id = Uuid::new_v4();
    let created_at = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO batches (id, status, total, created_at)
        VALUES (?, 'processing', ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(total as i64)
    .bind(created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(Batch {
        id,
        status: BatchStatus::Processing,
        total,
        dispatched: 0,
        completed: 0,
        failed: 0,
        summary: None,
        poll_iterations: 0,
        next_poll_at: None,
        created_at,
        completed_at: None,
    })
}

pub async fn load_batch(pool: &SqlitePool, id: Uuid) -> Result<Option<Batch>> {
    let sql = format!("SELECT {} FROM batches WHERE id = ?", BATCH_COLUMNS);

    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Batches still awaiting a final status
pub async fn list_processing(pool: &SqlitePool) -> Result<Vec<Batch>> {
    let sql = format!(
        "SELECT {} FROM batches WHERE status = 'processing' ORDER BY created_at",
        BATCH_COLUMNS
    );

    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(batch_from_row).collect()
}

/// Record the outcome of the dispatch pass
pub async fn record_dispatch(
    pool: &SqlitePool,
    id: Uuid,
    dispatched: usize,
    summary: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE batches
        SET status = 'processing', dispatched = ?, summary = ?
        WHERE id = ?
        "#,
    )
    .bind(dispatched as i64)
    .bind(summary)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist monitor progress so a restart resumes from the same iteration
pub async fn record_poll(
    pool: &SqlitePool,
    id: Uuid,
    poll_iterations: u32,
    next_poll_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE batches
        SET poll_iterations = ?, next_poll_at = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(poll_iterations as i64)
    .bind(next_poll_at.to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Write the final status and counts
///
/// Guarded on `status = 'processing'` so a batch is finalized at most once;
/// returns `false` if another writer got there first.
pub async fn finalize_batch(
    pool: &SqlitePool,
    id: Uuid,
    status: BatchStatus,
    completed: usize,
    failed: usize,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE batches
        SET status = ?, completed = ?, failed = ?, completed_at = ?, next_poll_at = NULL
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(status.as_str())
    .bind(completed as i64)
    .bind(failed as i64)
    .bind(now_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Close a batch without a completion verdict (stalled, cancelled)
pub async fn close_batch(pool: &SqlitePool, id: Uuid, status: BatchStatus) -> Result<bool> {
    let counts = count_items(pool, id).await?;
    finalize_batch(pool, id, status, counts.completed, counts.failed).await
}

/// Insert the queue row for one dispatch attempt
pub async fn insert_queue_item(
    pool: &SqlitePool,
    batch_id: Uuid,
    item_id: &str,
    item_type: &str,
    status: QueueItemStatus,
    error_message: Option<&str>,
) -> Result<QueueItem> {
    let id = Uuid::new_v4();
    let created_at = Utc::now();
    let processed_at = status.is_terminal().then_some(created_at);

    sqlx::query(
        r#"
        INSERT INTO queue_items (
            id, batch_id, item_id, item_type, status, error_message, created_at, processed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(batch_id.to_string())
    .bind(item_id)
    .bind(item_type)
    .bind(status.as_str())
    .bind(error_message)
    .bind(created_at.to_rfc3339())
    .bind(processed_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(QueueItem {
        id,
        batch_id,
        item_id: item_id.to_string(),
        item_type: item_type.to_string(),
        status,
        error_message: error_message.map(str::to_string),
        created_at,
        processed_at,
    })
}

/// Apply a child job's completion report
///
/// Only non-terminal items move; returns `false` if the item is unknown or
/// already terminal.
pub async fn update_item_status(
    pool: &SqlitePool,
    batch_id: Uuid,
    item_id: &str,
    status: QueueItemStatus,
    error_message: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE queue_items
        SET status = ?, error_message = ?, processed_at = ?
        WHERE batch_id = ? AND item_id = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(now_rfc3339())
    .bind(batch_id.to_string())
    .bind(item_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn list_items(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<QueueItem>> {
    let sql = format!(
        "SELECT {} FROM queue_items WHERE batch_id = ? ORDER BY created_at, rowid",
        ITEM_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(batch_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(item_from_row).collect()
}

/// Count a batch's items by status
///
/// `total` is the batch's declared size, so items that were never written
/// keep the batch open.
pub async fn count_items(pool: &SqlitePool, batch_id: Uuid) -> Result<StatusCounts> {
    let total: Option<i64> = sqlx::query_scalar("SELECT total FROM batches WHERE id = ?")
        .bind(batch_id.to_string())
        .fetch_optional(pool)
        .await?;

    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM queue_items WHERE batch_id = ? GROUP BY status",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut counts = StatusCounts {
        total: total.unwrap_or(0) as usize,
        ..Default::default()
    };

    for (status, count) in rows {
        let count = count as usize;
        match parse_status::<QueueItemStatus>(&status)? {
            QueueItemStatus::Pending => counts.pending += count,
            QueueItemStatus::Processing => counts.processing += count,
            QueueItemStatus::Completed => counts.completed += count,
            QueueItemStatus::Failed => counts.failed += count,
        }
    }

    Ok(counts)
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(Batch {
        id: parse_uuid(&id, "id")?,
        status: parse_status(&status)?,
        total: row.get::<i64, _>("total") as usize,
        dispatched: row.get::<i64, _>("dispatched") as usize,
        completed: row.get::<i64, _>("completed") as usize,
        failed: row.get::<i64, _>("failed") as usize,
        summary: row.get("summary"),
        poll_iterations: row.get::<i64, _>("poll_iterations") as u32,
        next_poll_at: parse_optional_timestamp(row.get("next_poll_at"), "next_poll_at")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        completed_at: parse_optional_timestamp(row.get("completed_at"), "completed_at")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<QueueItem> {
    let id: String = row.get("id");
    let batch_id: String = row.get("batch_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(QueueItem {
        id: parse_uuid(&id, "id")?,
        batch_id: parse_uuid(&batch_id, "batch_id")?,
        item_id: row.get("item_id"),
        item_type: row.get("item_type"),
        status: parse_status(&status)?,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        processed_at: parse_optional_timestamp(row.get("processed_at"), "processed_at")?,
    })
}
