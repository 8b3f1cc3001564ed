//! Database access for the pipeline
//!
//! One module per table. Every mutation is a single-row statement; idempotency
//! comes from unique constraints rather than transactions spanning stages.

pub mod batches;
pub mod candidates;
pub mod content;
pub mod execution_log;
pub mod generation_queue;
pub mod import_queue;
pub mod settings;
pub mod subjects;

use chrono::{DateTime, Utc};
use spindle_common::{Error, Result};
use std::str::FromStr;
use uuid::Uuid;

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(&s, column)).transpose()
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_status<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(Error::Internal)
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
