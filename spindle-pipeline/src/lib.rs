//! spindle-pipeline library interface
//!
//! Exposes the pipeline stages, the HTTP trigger surface and the shared
//! application state for the binary and for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use spindle_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::PipelineTimings;
use crate::services::PipelineServices;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub services: PipelineServices,
    pub timings: PipelineTimings,
    /// Used when a promotion request carries no `batchSize`
    pub default_batch_size: u32,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        services: PipelineServices,
        timings: PipelineTimings,
        default_batch_size: u32,
    ) -> Self {
        Self {
            db,
            event_bus,
            services,
            timings,
            default_batch_size,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember a failed invocation for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::discovery_routes())
        .merge(api::promotion_routes())
        .merge(api::batch_routes())
        .merge(api::import_queue_routes())
        .route("/events", get(api::event_stream))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
