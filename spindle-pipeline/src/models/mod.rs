//! Data models for the discovery and batch-processing pipeline

pub mod batch;
pub mod candidate;
pub mod import_record;
pub mod summary;

pub use batch::{Batch, BatchStatus, QueueItem, QueueItemStatus, StatusCounts, WorkItem};
pub use candidate::{normalize_title, CandidateStatus, DedupKey, NewCandidate, SourceCandidate};
pub use import_record::{ImportQueueRecord, ImportStatus};
pub use summary::{ExecutionLogEntry, StageSummary};
