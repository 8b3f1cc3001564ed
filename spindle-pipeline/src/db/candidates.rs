//! Source candidate persistence

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use spindle_common::Result;
use uuid::Uuid;

use super::{now_rfc3339, parse_status, parse_timestamp, parse_uuid};
use crate::models::{normalize_title, CandidateStatus, NewCandidate, SourceCandidate};

const CANDIDATE_COLUMNS: &str = r#"
    id, external_id, subject, title, normalized_title, year, format, label,
    artwork_url, status, error_message, created_at, updated_at
"#;

/// Insert a discovered candidate keyed on `external_id`
///
/// Returns `false` when a row with the same external identifier already
/// exists; the duplicate insert is a no-op, not an error.
pub async fn insert_if_absent(pool: &SqlitePool, candidate: &NewCandidate) -> Result<bool> {
    let now = now_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO source_candidates (
            id, external_id, subject, title, normalized_title, year, format, label,
            artwork_url, status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        ON CONFLICT(external_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&candidate.external_id)
    .bind(&candidate.subject)
    .bind(&candidate.title)
    .bind(normalize_title(&candidate.title))
    .bind(candidate.year)
    .bind(&candidate.format)
    .bind(&candidate.label)
    .bind(&candidate.artwork_url)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Pending candidates that carry artwork, newest first
pub async fn fetch_pending_with_artwork(
    pool: &SqlitePool,
    limit: u32,
) -> Result<Vec<SourceCandidate>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM source_candidates
        WHERE status = 'pending' AND artwork_url IS NOT NULL
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
        CANDIDATE_COLUMNS
    );

    let rows = sqlx::query(&sql).bind(limit as i64).fetch_all(pool).await?;
    rows.iter().map(candidate_from_row).collect()
}

/// Update a candidate's status in place
pub async fn set_status(
    pool: &SqlitePool,
    id: Uuid,
    status: CandidateStatus,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE source_candidates
        SET status = ?, error_message = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(now_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn count_by_status(pool: &SqlitePool, status: CandidateStatus) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM source_candidates WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

pub async fn count_for_subject(pool: &SqlitePool, subject: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_candidates WHERE subject = ?")
        .bind(subject)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn candidate_from_row(row: &SqliteRow) -> Result<SourceCandidate> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(SourceCandidate {
        id: parse_uuid(&id, "id")?,
        external_id: row.get("external_id"),
        subject: row.get("subject"),
        title: row.get("title"),
        normalized_title: row.get("normalized_title"),
        year: row.get("year"),
        format: row.get("format"),
        label: row.get("label"),
        artwork_url: row.get("artwork_url"),
        status: parse_status(&status)?,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}
