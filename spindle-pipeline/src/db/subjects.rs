//! Subjects (artists) known to discovery
//!
//! The number of known items per subject is derived from `source_candidates`
//! on every read; no counter is stored, so concurrent discovery runs cannot
//! make it drift.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use spindle_common::Result;

use super::{now_rfc3339, parse_optional_timestamp};

/// A subject and its resolved key in the external catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub catalog_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectStats {
    pub name: String,
    pub catalog_id: String,
    pub known_items: i64,
    pub last_discovered_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Register a subject or refresh its catalog key, stamping the discovery time
pub async fn mark_discovered(pool: &SqlitePool, subject: &Subject) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO subjects (name, catalog_id, last_discovered_at)
        VALUES (?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            catalog_id = excluded.catalog_id,
            last_discovered_at = excluded.last_discovered_at
        "#,
    )
    .bind(&subject.name)
    .bind(&subject.catalog_id)
    .bind(now_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Derived count of candidates ever discovered for a subject
pub async fn known_item_count(pool: &SqlitePool, subject: &str) -> Result<i64> {
    super::candidates::count_for_subject(pool, subject).await
}

pub async fn load_stats(pool: &SqlitePool, name: &str) -> Result<Option<SubjectStats>> {
    let row = sqlx::query(
        r#"
        SELECT s.name, s.catalog_id, s.last_discovered_at,
               (SELECT COUNT(*) FROM source_candidates c WHERE c.subject = s.name) AS known_items
        FROM subjects s
        WHERE s.name = ?
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(SubjectStats {
            name: row.get("name"),
            catalog_id: row.get("catalog_id"),
            known_items: row.get("known_items"),
            last_discovered_at: parse_optional_timestamp(
                row.get("last_discovered_at"),
                "last_discovered_at",
            )?,
        })),
        None => Ok(None),
    }
}
