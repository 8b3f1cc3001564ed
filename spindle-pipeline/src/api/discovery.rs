//! Discovery API handlers
//!
//! POST /discovery/run, GET /subjects/{name}

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::time::Instant;

use super::elapsed_ms;
use crate::db::subjects::{self, Subject, SubjectStats};
use crate::error::{ApiError, ApiResult};
use crate::models::StageSummary;
use crate::AppState;

/// POST /discovery/run request
#[derive(Debug, Deserialize)]
pub struct DiscoveryRequest {
    pub subject: String,
    pub catalog_id: String,
}

/// POST /discovery/run
///
/// Runs discovery to completion; the response carries the report.
pub async fn run_discovery(
    State(state): State<AppState>,
    Json(request): Json<DiscoveryRequest>,
) -> ApiResult<Json<StageSummary>> {
    let started = Instant::now();
    let subject = Subject {
        name: request.subject.trim().to_string(),
        catalog_id: request.catalog_id.trim().to_string(),
    };

    let report = match state.services.discovery.run(&subject).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(subject = %subject.name, error = %e, "Discovery failed");
            state.record_error(format!("discovery: {}", e)).await;
            return Err(ApiError::from(e));
        }
    };

    let mut summary = StageSummary::new("discovery").with_details(&report);
    summary.processed = report.discovered;
    summary.inserted = report.inserted;
    summary.skipped = report.skipped;
    summary.execution_time_ms = elapsed_ms(started);

    Ok(Json(summary))
}

/// GET /subjects/{name}
///
/// Known-item count is derived from the candidates on every request.
pub async fn get_subject(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SubjectStats>> {
    subjects::load_stats(&state.db, &name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Subject not found: {}", name)))
}

pub fn discovery_routes() -> Router<AppState> {
    Router::new()
        .route("/discovery/run", post(run_discovery))
        .route("/subjects/:name", get(get_subject))
}
