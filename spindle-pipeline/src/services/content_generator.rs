//! Downstream content generator used by the sequential processor

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_common::config::get_user_agent;
use std::time::Duration;
use thiserror::Error;

use super::retry::{is_transient_message, Retryable};
use crate::models::ImportQueueRecord;

/// Successful generator responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOutcome {
    Created,
    /// Target already existed; not an error
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Generator request timed out")]
    Timeout,

    #[error("Generator rate limited (HTTP {0})")]
    RateLimited(u16),

    #[error("Generator error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Generation service base URL not configured")]
    NotConfigured,
}

impl Retryable for GeneratorError {
    fn is_retryable(&self) -> bool {
        match self {
            GeneratorError::Network(_) | GeneratorError::Timeout | GeneratorError::RateLimited(_) => {
                true
            }
            GeneratorError::Api { message, .. } => is_transient_message(message),
            GeneratorError::NotConfigured => false,
        }
    }
}

impl From<reqwest::Error> for GeneratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GeneratorError::Timeout
        } else {
            GeneratorError::Network(e.to_string())
        }
    }
}

/// Generates content for one import record per call
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, record: &ImportQueueRecord) -> Result<GenerationOutcome, GeneratorError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    external_id: &'a str,
    subject: &'a str,
    title: &'a str,
}

/// Generation service content API over HTTP
///
/// `201`/`200` mean created, `409` means the target already exists.
pub struct HttpContentGenerator {
    http_client: reqwest::Client,
    base_url: Option<String>,
    token: Option<String>,
}

impl HttpContentGenerator {
    pub fn new(base_url: Option<String>, token: Option<String>) -> Result<Self, GeneratorError> {
        let http_client = reqwest::Client::builder()
            .user_agent(get_user_agent())
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            token,
        })
    }
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn generate(&self, record: &ImportQueueRecord) -> Result<GenerationOutcome, GeneratorError> {
        let base_url = self.base_url.as_deref().ok_or(GeneratorError::NotConfigured)?;
        let url = format!("{}/content", base_url);

        let mut request = self.http_client.post(&url).json(&GenerateRequest {
            external_id: &record.external_id,
            subject: &record.subject,
            title: &record.title,
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        match status {
            200 | 201 => Ok(GenerationOutcome::Created),
            409 => Ok(GenerationOutcome::AlreadyExists),
            429 | 503 => Err(GeneratorError::RateLimited(status)),
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(GeneratorError::Api { status, message })
            }
        }
    }
}
