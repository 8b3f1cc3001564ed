//! Shared dedup-key capability
//!
//! Every destination that holds generated or to-be-generated content is
//! registered as a `DedupSource`. Stages ask the `DedupIndex`, never the
//! individual tables, so a new destination only needs registering here.

use async_trait::async_trait;
use spindle_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::DedupKey;

/// A destination that can report which dedup keys it already holds
#[async_trait]
pub trait DedupSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Keys held for any of the given (lowercased) subjects
    async fn known_keys(&self, subject_keys: &[String]) -> Result<HashSet<DedupKey>>;
}

/// A table carrying `subject_key` and `normalized_title` columns
pub struct TableDedupSource {
    pool: SqlitePool,
    table: &'static str,
}

impl TableDedupSource {
    pub fn generation_queue(pool: SqlitePool) -> Self {
        Self {
            pool,
            table: "generation_queue",
        }
    }

    pub fn content_items(pool: SqlitePool) -> Self {
        Self {
            pool,
            table: "content_items",
        }
    }
}

#[async_trait]
impl DedupSource for TableDedupSource {
    fn name(&self) -> &'static str {
        self.table
    }

    async fn known_keys(&self, subject_keys: &[String]) -> Result<HashSet<DedupKey>> {
        if subject_keys.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; subject_keys.len()].join(", ");
        let sql = format!(
            "SELECT subject_key, normalized_title FROM {} WHERE subject_key IN ({})",
            self.table, placeholders
        );

        let mut query = sqlx::query(&sql);
        for key in subject_keys {
            query = query.bind(key);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| DedupKey::from_parts(row.get("subject_key"), row.get("normalized_title")))
            .collect())
    }
}

/// Union of all registered destinations
#[derive(Clone, Default)]
pub struct DedupIndex {
    sources: Vec<Arc<dyn DedupSource>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation queue plus final content store
    pub fn for_pipeline(pool: &SqlitePool) -> Self {
        Self::new()
            .with_source(Arc::new(TableDedupSource::generation_queue(pool.clone())))
            .with_source(Arc::new(TableDedupSource::content_items(pool.clone())))
    }

    pub fn with_source(mut self, source: Arc<dyn DedupSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Keys known to any destination for the given subjects
    pub async fn known_keys(&self, subject_keys: &[String]) -> Result<HashSet<DedupKey>> {
        let mut known = HashSet::new();
        for source in &self.sources {
            let keys = source.known_keys(subject_keys).await?;
            tracing::debug!(source = source.name(), count = keys.len(), "Dedup keys loaded");
            known.extend(keys);
        }
        Ok(known)
    }
}
