//! Generation queue writes (promotion destination)

use sqlx::SqlitePool;
use spindle_common::Result;
use uuid::Uuid;

use super::now_rfc3339;
use crate::models::SourceCandidate;

/// Enqueue a promoted candidate with default priority and zero attempts
///
/// A duplicate `(subject_key, normalized_title)` surfaces as a unique
/// violation; callers decide how to treat it.
pub async fn insert_entry(pool: &SqlitePool, candidate: &SourceCandidate) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let key = candidate.dedup_key();

    sqlx::query(
        r#"
        INSERT INTO generation_queue (
            id, candidate_id, subject, subject_key, title, normalized_title,
            artwork_url, priority, attempts, status, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, 'pending', ?)
        "#,
    )
    .bind(id.to_string())
    .bind(candidate.id.to_string())
    .bind(&candidate.subject)
    .bind(&key.subject_key)
    .bind(&candidate.title)
    .bind(&key.normalized_title)
    .bind(&candidate.artwork_url)
    .bind(now_rfc3339())
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn count_entries(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM generation_queue")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
