//! Stage response summaries and execution-log rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON summary returned by every stage trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub success: bool,
    pub stage: String,
    pub processed: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub execution_time_ms: u64,
    /// Stage-specific report (discovery counts, batch id, record status, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StageSummary {
    pub fn new(stage: &str) -> Self {
        Self {
            success: true,
            stage: stage.to_string(),
            processed: 0,
            inserted: 0,
            skipped: 0,
            failed: 0,
            execution_time_ms: 0,
            details: None,
        }
    }

    pub fn with_details<T: Serialize>(mut self, details: &T) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }
}

/// One append-only execution-log row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub success: bool,
    pub error_message: Option<String>,
}

impl ExecutionLogEntry {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_uses_camel_case_timing_field() {
        let mut summary = StageSummary::new("promotion");
        summary.execution_time_ms = 42;
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["executionTimeMs"], 42);
        assert_eq!(json["success"], true);
        assert!(json.get("details").is_none());
    }
}
