//! Child job starts on the generation service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_common::config::get_user_agent;
use std::time::Duration;
use thiserror::Error;

use super::retry::{is_transient_message, Retryable};
use crate::models::WorkItem;

#[derive(Debug, Error)]
pub enum JobLaunchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Job start timed out")]
    Timeout,

    #[error("Provider rate limited (HTTP {0})")]
    RateLimited(u16),

    #[error("Job rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Generation service base URL not configured")]
    NotConfigured,
}

impl Retryable for JobLaunchError {
    fn is_retryable(&self) -> bool {
        match self {
            JobLaunchError::Network(_) | JobLaunchError::Timeout | JobLaunchError::RateLimited(_) => {
                true
            }
            JobLaunchError::Rejected { message, .. } => is_transient_message(message),
            JobLaunchError::Parse(_) | JobLaunchError::NotConfigured => false,
        }
    }
}

impl From<reqwest::Error> for JobLaunchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            JobLaunchError::Timeout
        } else {
            JobLaunchError::Network(e.to_string())
        }
    }
}

/// Starts one child job per work item
///
/// Implementations must tolerate being called more than once for the same
/// item: the retry wrapper re-invokes on ambiguous failures.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Start the job and return its identifier
    async fn start_job(&self, item: &WorkItem) -> Result<String, JobLaunchError>;
}

#[derive(Debug, Deserialize)]
struct StartJobResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct StartJobRequest<'a> {
    item_type: &'a str,
    payload: &'a serde_json::Value,
}

/// Generation service job API over HTTP
pub struct HttpJobLauncher {
    http_client: reqwest::Client,
    base_url: Option<String>,
    token: Option<String>,
}

impl HttpJobLauncher {
    pub fn new(base_url: Option<String>, token: Option<String>) -> Result<Self, JobLaunchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(get_user_agent())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| JobLaunchError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            token,
        })
    }
}

#[async_trait]
impl JobLauncher for HttpJobLauncher {
    async fn start_job(&self, item: &WorkItem) -> Result<String, JobLaunchError> {
        let base_url = self.base_url.as_deref().ok_or(JobLaunchError::NotConfigured)?;
        let url = format!("{}/jobs", base_url);

        let mut request = self.http_client.post(&url).json(&StartJobRequest {
            item_type: &item.item_type,
            payload: &item.payload,
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        if status == 429 || status == 503 {
            return Err(JobLaunchError::RateLimited(status));
        }

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(JobLaunchError::Rejected { status, message });
        }

        let body: StartJobResponse = response
            .json()
            .await
            .map_err(|e| JobLaunchError::Parse(e.to_string()))?;

        tracing::debug!(item_type = %item.item_type, job_id = %body.id, "Child job started");

        Ok(body.id)
    }
}
