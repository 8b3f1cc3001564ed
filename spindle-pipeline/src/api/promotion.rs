//! Promotion API handler

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use std::time::Instant;

use super::elapsed_ms;
use crate::config::clamp_batch_size;
use crate::error::ApiResult;
use crate::models::StageSummary;
use crate::AppState;

/// POST /promotion/run request (body optional)
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequest {
    pub batch_size: Option<u32>,
}

/// POST /promotion/run
///
/// `batchSize` is clamped to [1, 50].
pub async fn run_promotion(
    State(state): State<AppState>,
    request: Option<Json<PromotionRequest>>,
) -> ApiResult<Json<StageSummary>> {
    let started = Instant::now();
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let batch_size = clamp_batch_size(request.batch_size, state.default_batch_size);

    let report = match state.services.promotion.run(batch_size).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(batch_size, error = %e, "Promotion failed");
            state.record_error(format!("promotion: {}", e)).await;
            return Err(e.into());
        }
    };

    let mut summary = StageSummary::new("promotion").with_details(&report);
    summary.processed = report.fetched;
    summary.inserted = report.inserted;
    summary.skipped = report.skipped;
    summary.failed = report.failed;
    summary.execution_time_ms = elapsed_ms(started);

    Ok(Json(summary))
}

pub fn promotion_routes() -> Router<AppState> {
    Router::new().route("/promotion/run", post(run_promotion))
}
