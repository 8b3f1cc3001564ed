//! Final content store
//!
//! Rows are written once content has been generated (by the sequential
//! processor or an external generator) and are read by the dedup index.

use sqlx::SqlitePool;
use spindle_common::Result;
use uuid::Uuid;

use super::now_rfc3339;
use crate::models::DedupKey;

/// Record generated content; returns `false` if the key was already present
pub async fn record_content_item(
    pool: &SqlitePool,
    subject: &str,
    title: &str,
    external_id: Option<&str>,
) -> Result<bool> {
    let key = DedupKey::new(subject, title);

    let result = sqlx::query(
        r#"
        INSERT INTO content_items (
            id, subject, subject_key, title, normalized_title, external_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(subject_key, normalized_title) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(subject)
    .bind(&key.subject_key)
    .bind(title)
    .bind(&key.normalized_title)
    .bind(external_id)
    .bind(now_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn count_items(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_items")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
