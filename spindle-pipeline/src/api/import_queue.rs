//! Import queue API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::time::Instant;
use uuid::Uuid;

use super::elapsed_ms;
use crate::db::import_queue;
use crate::error::{ApiError, ApiResult};
use crate::models::{ImportQueueRecord, StageSummary};
use crate::services::SequentialOutcome;
use crate::AppState;

/// POST /import-queue request
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub external_id: String,
    pub subject: String,
    pub title: String,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// POST /import-queue
///
/// Records are validated when processed, not here: a malformed record is
/// accepted and later failed without retry.
pub async fn enqueue_record(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<ImportQueueRecord>)> {
    if request.subject.trim().is_empty() {
        return Err(ApiError::BadRequest("subject must not be empty".to_string()));
    }

    let max_retries = request
        .max_retries
        .unwrap_or(state.timings.import_max_retries)
        .max(1);

    let record = import_queue::enqueue(
        &state.db,
        request.external_id.trim(),
        request.subject.trim(),
        &request.title,
        max_retries,
    )
    .await?;

    tracing::info!(record_id = %record.id, external_id = %record.external_id, "Import record enqueued");

    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /import-queue/{id}
pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> ApiResult<Json<ImportQueueRecord>> {
    import_queue::load_record(&state.db, record_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Import record not found: {}", record_id)))
}

/// POST /import-queue/process
///
/// Handles at most one record; holds the configured delay before answering
/// when a record was handled.
pub async fn process_next(State(state): State<AppState>) -> ApiResult<Json<StageSummary>> {
    let started = Instant::now();

    let outcome = match state.services.sequential.process_next().await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Sequential processing failed");
            state.record_error(format!("import_queue: {}", e)).await;
            return Err(e.into());
        }
    };

    let mut summary = StageSummary::new("import_queue").with_details(&outcome);
    summary.processed = usize::from(outcome.handled_record());
    match outcome {
        SequentialOutcome::Completed { .. } => summary.inserted = 1,
        SequentialOutcome::Skipped { .. } => summary.skipped = 1,
        SequentialOutcome::Failed { .. } | SequentialOutcome::Retrying { .. } => summary.failed = 1,
        SequentialOutcome::Idle | SequentialOutcome::Contended { .. } => {}
    }
    summary.execution_time_ms = elapsed_ms(started);

    Ok(Json(summary))
}

pub fn import_queue_routes() -> Router<AppState> {
    Router::new()
        .route("/import-queue", post(enqueue_record))
        .route("/import-queue/process", post(process_next))
        .route("/import-queue/:id", get(get_record))
}
