//! External catalog API client
//!
//! Paginated, bearer-token authenticated release listings per subject and
//! format. Pacing is not done here: callers share one `ApiRateLimiter` for
//! the catalog.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_common::config::{get_user_agent, TomlConfig};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use thiserror::Error;

use super::retry::{is_transient_message, Retryable};

/// Catalog client errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Catalog request timed out")]
    Timeout,

    /// HTTP 429; the discovery stage owns the cool-down for this
    #[error("Rate limit exceeded (HTTP 429)")]
    RateLimited,

    #[error("Catalog entry not found: {0}")]
    NotFound(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Catalog token not configured")]
    MissingToken,
}

impl Retryable for CatalogError {
    fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Network(_) | CatalogError::Timeout => true,
            CatalogError::Api(status, message) => {
                *status == 503 || *status == 504 || is_transient_message(message)
            }
            // 429 is answered with a cool-down, not exponential backoff
            CatalogError::RateLimited => false,
            CatalogError::NotFound(_) | CatalogError::Parse(_) | CatalogError::MissingToken => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CatalogError::Timeout
        } else {
            CatalogError::Network(e.to_string())
        }
    }
}

/// One release entry as listed by the catalog
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CatalogRelease {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Subject's role on the release (`Main`, `Appearance`, ...)
    #[serde(default)]
    pub role: Option<String>,
    /// Artwork thumbnail URL; the catalog sends an empty string when absent
    #[serde(default)]
    pub thumb: Option<String>,
}

impl CatalogRelease {
    /// Primary-role entries only
    pub fn is_primary(&self) -> bool {
        self.role.as_deref().map_or(false, |r| r.eq_ignore_ascii_case("main"))
    }

    pub fn artwork_url(&self) -> Option<String> {
        self.thumb
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Pagination {
    pub page: u32,
    pub pages: u32,
}

/// One page of a release listing
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CatalogPage {
    pub pagination: Pagination,
    #[serde(default)]
    pub releases: Vec<CatalogRelease>,
}

impl CatalogPage {
    pub fn has_next(&self) -> bool {
        self.pagination.page < self.pagination.pages
    }
}

/// Paginated release source for one subject
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch `page` (1-based) of `catalog_id`'s releases in `format`
    async fn fetch_page(
        &self,
        catalog_id: &str,
        format: &str,
        page: u32,
    ) -> Result<CatalogPage, CatalogError>;
}

/// Catalog API over HTTP
pub struct HttpCatalogClient {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    per_page: u32,
}

impl HttpCatalogClient {
    pub fn new(base_url: String, token: Option<String>, per_page: u32) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(get_user_agent())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            per_page: per_page.clamp(1, 100),
        })
    }

    /// Create from configuration sources
    ///
    /// A missing token does not fail construction; every fetch then fails
    /// with `MissingToken` so the service can still start.
    pub async fn from_config(
        db: &Pool<Sqlite>,
        toml_config: &TomlConfig,
    ) -> spindle_common::Result<Self> {
        let token = match crate::config::resolve_catalog_token(db, toml_config).await {
            Ok(token) => Some(token),
            Err(spindle_common::Error::Config(msg)) => {
                tracing::warn!("{}", msg);
                None
            }
            Err(e) => return Err(e),
        };

        Self::new(
            toml_config.catalog.base_url.clone(),
            token,
            toml_config.catalog.per_page,
        )
        .map_err(|e| spindle_common::Error::Internal(e.to_string()))
    }

    fn releases_url(&self, catalog_id: &str) -> String {
        format!("{}/artists/{}/releases", self.base_url, catalog_id)
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogClient {
    async fn fetch_page(
        &self,
        catalog_id: &str,
        format: &str,
        page: u32,
    ) -> Result<CatalogPage, CatalogError> {
        let token = self.token.as_deref().ok_or(CatalogError::MissingToken)?;
        let url = self.releases_url(catalog_id);

        tracing::debug!(catalog_id, format, page, url = %url, "Querying catalog API");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("format", format.to_string()),
                ("page", page.to_string()),
                ("per_page", self.per_page.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            return Err(CatalogError::RateLimited);
        }

        if status.as_u16() == 404 {
            return Err(CatalogError::NotFound(catalog_id.to_string()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CatalogError::Api(status.as_u16(), error_text));
        }

        response
            .json::<CatalogPage>()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))
    }
}
