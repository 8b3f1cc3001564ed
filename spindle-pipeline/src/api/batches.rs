//! Batch API handlers
//!
//! POST /batches, GET /batches/{id}, POST /batches/{id}/cancel,
//! POST /batches/{batch_id}/items/{item_id}/status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use spindle_common::events::PipelineEvent;
use std::time::Instant;
use uuid::Uuid;

use super::elapsed_ms;
use crate::db::batches;
use crate::error::{ApiError, ApiResult};
use crate::models::{Batch, BatchStatus, QueueItem, QueueItemStatus, StageSummary, StatusCounts, WorkItem};
use crate::AppState;

/// POST /batches request
#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub items: Vec<WorkItem>,
}

/// GET /batches/{id} response
#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub batch: Batch,
    pub counts: StatusCounts,
    pub items: Vec<QueueItem>,
    pub monitor_running: bool,
}

/// POST /batches/{id}/cancel response
#[derive(Debug, Serialize)]
pub struct CancelBatchResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
}

/// Child job completion report
#[derive(Debug, Deserialize)]
pub struct ItemStatusRequest {
    pub status: QueueItemStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemStatusResponse {
    pub batch_id: Uuid,
    pub item_id: String,
    pub status: QueueItemStatus,
}

/// POST /batches
///
/// Returns 202 once every item has been dispatched; completion is tracked
/// in the background.
pub async fn dispatch_batch(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> ApiResult<(StatusCode, Json<StageSummary>)> {
    let started = Instant::now();

    let report = match state.services.dispatcher.dispatch(request.items).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Batch dispatch failed");
            state.record_error(format!("dispatch: {}", e)).await;
            return Err(e.into());
        }
    };

    let mut summary = StageSummary::new("dispatch").with_details(&report);
    summary.success = report.started > 0;
    summary.processed = report.total;
    summary.inserted = report.started;
    summary.failed = report.failed;
    summary.execution_time_ms = elapsed_ms(started);

    Ok((StatusCode::ACCEPTED, Json(summary)))
}

/// GET /batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchStatusResponse>> {
    let batch = load_batch_or_404(&state, batch_id).await?;
    let counts = batches::count_items(&state.db, batch_id).await?;
    let items = batches::list_items(&state.db, batch_id).await?;
    let monitor_running = state.services.monitors.is_running(batch_id).await;

    Ok(Json(BatchStatusResponse {
        batch,
        counts,
        items,
        monitor_running,
    }))
}

/// POST /batches/{id}/cancel
///
/// Stops the batch's completion monitor and marks the batch `cancelled`.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<CancelBatchResponse>> {
    let batch = load_batch_or_404(&state, batch_id).await?;

    if !state.services.monitors.cancel(batch_id).await? {
        return Err(ApiError::Conflict(format!(
            "Batch {} is already {}",
            batch_id,
            batch.status.as_str()
        )));
    }

    Ok(Json(CancelBatchResponse {
        batch_id,
        status: BatchStatus::Cancelled,
    }))
}

/// POST /batches/{batch_id}/items/{item_id}/status
///
/// Only `completed` and `failed` are accepted, and only for items that are
/// not yet terminal.
pub async fn update_item_status(
    State(state): State<AppState>,
    Path((batch_id, item_id)): Path<(Uuid, String)>,
    Json(request): Json<ItemStatusRequest>,
) -> ApiResult<Json<ItemStatusResponse>> {
    if !request.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "status must be completed or failed, got {}",
            request.status.as_str()
        )));
    }

    let updated = batches::update_item_status(
        &state.db,
        batch_id,
        &item_id,
        request.status,
        request.error_message.as_deref(),
    )
    .await?;

    if !updated {
        load_batch_or_404(&state, batch_id).await?;
        return Err(ApiError::Conflict(format!(
            "Item {} is unknown or already terminal in batch {}",
            item_id, batch_id
        )));
    }

    tracing::info!(
        batch_id = %batch_id,
        item_id = %item_id,
        status = request.status.as_str(),
        "Queue item updated by child job"
    );

    state.event_bus.emit_lossy(PipelineEvent::QueueItemUpdated {
        batch_id,
        item_id: item_id.clone(),
        status: request.status.as_str().to_string(),
        timestamp: Utc::now(),
    });

    Ok(Json(ItemStatusResponse {
        batch_id,
        item_id,
        status: request.status,
    }))
}

async fn load_batch_or_404(state: &AppState, batch_id: Uuid) -> ApiResult<Batch> {
    batches::load_batch(&state.db, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch not found: {}", batch_id)))
}

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batches", post(dispatch_batch))
        .route("/batches/:id", get(get_batch))
        .route("/batches/:id/cancel", post(cancel_batch))
        .route(
            "/batches/:id/items/:item_id/status",
            post(update_item_status),
        )
}
