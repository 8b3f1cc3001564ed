//! Error types for spindle-pipeline
//!
//! Stage-local failures become row status plus `error_message`; only
//! failures that abort a whole request surface as `ApiError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{CatalogError, DiscoveryError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a batch that is no longer processing
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External collaborator failed after retries (502)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// spindle-common error
    #[error("{0}")]
    Common(#[from] spindle_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            ApiError::Common(ref err) => {
                let (status, code) = match err {
                    spindle_common::Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    spindle_common::Error::InvalidInput(_) => {
                        (StatusCode::BAD_REQUEST, "BAD_REQUEST")
                    }
                    spindle_common::Error::Config(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR")
                    }
                    spindle_common::Error::Internal(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
                };
                (status, code, err.to_string())
            }
        };

        let body = Json(json!({
            "success": false,
            "error": message,
            "code": error_code,
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::InvalidSubject(msg) => ApiError::BadRequest(msg),
            DiscoveryError::Catalog {
                source: CatalogError::MissingToken,
                ..
            } => ApiError::Common(spindle_common::Error::Config(
                "Catalog token not configured".to_string(),
            )),
            err @ (DiscoveryError::Catalog { .. }
            | DiscoveryError::CooldownExhausted { .. }
            | DiscoveryError::PageLimitExceeded { .. }) => {
                ApiError::Upstream(err.to_string())
            }
            DiscoveryError::Database(e) => ApiError::Common(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_configuration_maps_to_500() {
        let response =
            ApiError::from(spindle_common::Error::Config("no token".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_common_not_found_maps_to_404() {
        let response =
            ApiError::from(spindle_common::Error::NotFound("batch".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_missing_catalog_token_is_server_error() {
        let err = DiscoveryError::Catalog {
            format: "Vinyl".into(),
            page: 1,
            source: CatalogError::MissingToken,
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_exhausted_cooldowns_are_upstream_errors() {
        let err = DiscoveryError::CooldownExhausted {
            format: "CD".into(),
            page: 4,
            cooldowns: 5,
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_runaway_pagination_is_upstream_error() {
        let err = DiscoveryError::PageLimitExceeded {
            format: "Vinyl".into(),
            max_pages: 500,
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_bad_request_status() {
        let response = ApiError::BadRequest("items must not be empty".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
