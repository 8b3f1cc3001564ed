//! Import queue persistence for the sequential processor

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use spindle_common::Result;
use uuid::Uuid;

use super::{now_rfc3339, parse_optional_timestamp, parse_status, parse_timestamp, parse_uuid};
use crate::models::{ImportQueueRecord, ImportStatus};

const RECORD_COLUMNS: &str = r#"
    id, external_id, subject, title, status, retry_count, max_retries,
    error_message, created_at, updated_at, processed_at
"#;

pub async fn enqueue(
    pool: &SqlitePool,
    external_id: &str,
    subject: &str,
    title: &str,
    max_retries: u32,
) -> Result<ImportQueueRecord> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO import_queue (
            id, external_id, subject, title, status, retry_count, max_retries,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, 'pending', 0, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(external_id)
    .bind(subject)
    .bind(title)
    .bind(max_retries as i64)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(ImportQueueRecord {
        id,
        external_id: external_id.to_string(),
        subject: subject.to_string(),
        title: title.to_string(),
        status: ImportStatus::Pending,
        retry_count: 0,
        max_retries,
        error_message: None,
        created_at: now,
        updated_at: now,
        processed_at: None,
    })
}

/// The single oldest pending record
pub async fn next_pending(pool: &SqlitePool) -> Result<Option<ImportQueueRecord>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM import_queue
        WHERE status = 'pending'
        ORDER BY created_at ASC, rowid ASC
        LIMIT 1
        "#,
        RECORD_COLUMNS
    );

    let row = sqlx::query(&sql).fetch_optional(pool).await?;
    row.as_ref().map(record_from_row).transpose()
}

pub async fn load_record(pool: &SqlitePool, id: Uuid) -> Result<Option<ImportQueueRecord>> {
    let sql = format!("SELECT {} FROM import_queue WHERE id = ?", RECORD_COLUMNS);

    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Claim a pending record; `false` if another invocation took it first
pub async fn claim(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE import_queue
        SET status = 'processing', updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(now_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Return records claimed before `claimed_before` to `pending`
///
/// `retry_count` is left alone: the interrupted attempt produced no outcome.
pub async fn release_claims(pool: &SqlitePool, claimed_before: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE import_queue
        SET status = 'pending', updated_at = ?
        WHERE status = 'processing' AND updated_at <= ?
        "#,
    )
    .bind(now_rfc3339())
    .bind(claimed_before.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Write a terminal status (completed, skipped, failed)
pub async fn mark_terminal(
    pool: &SqlitePool,
    id: Uuid,
    status: ImportStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let now = now_rfc3339();

    sqlx::query(
        r#"
        UPDATE import_queue
        SET status = ?, error_message = ?, updated_at = ?, processed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Count one failed attempt
///
/// Increments `retry_count`; the record returns to `pending` while
/// `retry_count < max_retries` and becomes `failed` once it reaches the cap.
/// Returns the resulting status and retry count.
pub async fn record_failure(
    pool: &SqlitePool,
    id: Uuid,
    error_message: &str,
) -> Result<(ImportStatus, u32)> {
    let now = now_rfc3339();

    let (status, retry_count): (String, i64) = sqlx::query_as(
        r#"
        UPDATE import_queue
        SET retry_count = retry_count + 1,
            status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
            processed_at = CASE WHEN retry_count + 1 >= max_retries THEN ? ELSE processed_at END,
            error_message = ?,
            updated_at = ?
        WHERE id = ?
        RETURNING status, retry_count
        "#,
    )
    .bind(&now)
    .bind(error_message)
    .bind(&now)
    .bind(id.to_string())
    .fetch_one(pool)
    .await?;

    Ok((parse_status(&status)?, retry_count as u32))
}

pub async fn count_by_status(pool: &SqlitePool, status: ImportStatus) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_queue WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn record_from_row(row: &SqliteRow) -> Result<ImportQueueRecord> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(ImportQueueRecord {
        id: parse_uuid(&id, "id")?,
        external_id: row.get("external_id"),
        subject: row.get("subject"),
        title: row.get("title"),
        status: parse_status(&status)?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        processed_at: parse_optional_timestamp(row.get("processed_at"), "processed_at")?,
    })
}
