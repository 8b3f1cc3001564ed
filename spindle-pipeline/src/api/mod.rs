//! HTTP API handlers for spindle-pipeline
//!
//! Each stage can be triggered on demand; every trigger answers with a
//! `StageSummary`.

pub mod batches;
pub mod discovery;
pub mod health;
pub mod import_queue;
pub mod promotion;
pub mod sse;

pub use batches::batch_routes;
pub use discovery::discovery_routes;
pub use health::health_routes;
pub use import_queue::import_queue_routes;
pub use promotion::promotion_routes;
pub use sse::event_stream;

use std::time::Instant;

/// Milliseconds since `started`, for `executionTimeMs`
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
