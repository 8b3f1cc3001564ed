//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::db::{candidates, generation_queue, import_queue};
use crate::models::{CandidateStatus, ImportStatus};
use crate::AppState;

/// Work waiting in each stage's table
#[derive(Debug, Serialize)]
pub struct QueueDepths {
    pub pending_candidates: i64,
    pub generation_queue: i64,
    pub import_pending: i64,
    pub import_processing: i64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("spindle-pipeline")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Git commit the binary was built from
    pub git_hash: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Completion monitors currently polling
    pub active_monitors: usize,
    /// Omitted when the database could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queues: Option<QueueDepths>,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();

    let queues = match queue_depths(&state).await {
        Ok(depths) => Some(depths),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read queue depths for health check");
            None
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "spindle-pipeline".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_seconds,
        active_monitors: state.services.monitors.active_count().await,
        queues,
        last_error,
    })
}

async fn queue_depths(state: &AppState) -> spindle_common::Result<QueueDepths> {
    Ok(QueueDepths {
        pending_candidates: candidates::count_by_status(&state.db, CandidateStatus::Pending).await?,
        generation_queue: generation_queue::count_entries(&state.db).await?,
        import_pending: import_queue::count_by_status(&state.db, ImportStatus::Pending).await?,
        import_processing: import_queue::count_by_status(&state.db, ImportStatus::Processing)
            .await?,
    })
}

/// Build health check routes
pub fn health_routes() -> axum::Router<AppState> {
    Router::new().route("/health", get(health_check))
}
