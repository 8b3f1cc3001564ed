//! Single-item work units consumed by the sequential processor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    /// Target already existed downstream
    Skipped,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Skipped => "skipped",
            ImportStatus::Failed => "failed",
        }
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "skipped" => Ok(ImportStatus::Skipped),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(format!("unknown import status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportQueueRecord {
    pub id: Uuid,
    pub external_id: String,
    pub subject: String,
    pub title: String,
    pub status: ImportStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ImportQueueRecord {
    /// Check the fields the generator relies on
    ///
    /// A failure here is permanent: retrying a malformed record never helps.
    pub fn validate(&self) -> Result<u64, String> {
        let invalid = || format!("external_id '{}' is not a positive integer", self.external_id);

        // Digits only: `parse` alone would accept a leading '+'
        let external_id = self.external_id.trim();
        if external_id.is_empty() || !external_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let parsed = external_id.parse::<u64>().map_err(|_| invalid())?;
        if parsed == 0 {
            return Err(invalid());
        }
        if self.title.trim().is_empty() {
            return Err("title is empty".to_string());
        }
        Ok(parsed)
    }
}
