//! Discovered source candidates and the dedup key shared by every stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a discovered candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Discovered, waiting for promotion
    Pending,
    /// Promoted into the generation queue
    Queued,
    /// Already known to a destination, never promoted
    Skipped,
    /// Promotion insert failed for a non-duplicate reason
    Failed,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Queued => "queued",
            CandidateStatus::Skipped => "skipped",
            CandidateStatus::Failed => "failed",
        }
    }
}

impl FromStr for CandidateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CandidateStatus::Pending),
            "queued" => Ok(CandidateStatus::Queued),
            "skipped" => Ok(CandidateStatus::Skipped),
            "failed" => Ok(CandidateStatus::Failed),
            other => Err(format!("unknown candidate status '{}'", other)),
        }
    }
}

/// A release discovered in the external catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCandidate {
    pub id: Uuid,
    /// Catalog identifier, unique within the source
    pub external_id: String,
    pub subject: String,
    pub title: String,
    pub normalized_title: String,
    pub year: Option<i32>,
    pub format: Option<String>,
    pub label: Option<String>,
    pub artwork_url: Option<String>,
    pub status: CandidateStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceCandidate {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.subject, &self.title)
    }
}

/// Candidate fields as produced by discovery, before persistence
#[derive(Debug, Clone, PartialEq)]
pub struct NewCandidate {
    pub external_id: String,
    pub subject: String,
    pub title: String,
    pub year: Option<i32>,
    pub format: Option<String>,
    pub label: Option<String>,
    pub artwork_url: Option<String>,
}

/// `(subject, normalized title)` compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub subject_key: String,
    pub normalized_title: String,
}

impl DedupKey {
    pub fn new(subject: &str, title: &str) -> Self {
        Self {
            subject_key: normalize_title(subject),
            normalized_title: normalize_title(title),
        }
    }

    /// Build from already-normalized columns
    pub fn from_parts(subject_key: String, normalized_title: String) -> Self {
        Self {
            subject_key,
            normalized_title,
        }
    }
}

/// Trim, lowercase and collapse whitespace runs
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
