//! Discovery/ingestion stage
//!
//! Pages through the catalog for one subject, one format filter at a time,
//! then filters, deduplicates and writes pending source candidates.
//!
//! **Pacing:** page requests go through the catalog's shared rate limiter.
//! An HTTP 429 triggers a blocking cool-down and the identical page is
//! requested again, up to `max_cooldowns` times per page. A listing that
//! claims more than `max_pages` pages for one format aborts the run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use spindle_common::events::{EventBus, PipelineEvent};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::catalog_client::{CatalogError, CatalogPage, CatalogRelease, CatalogSource};
use super::rate_limiter::ApiRateLimiter;
use super::retry::{invoke_with_retry, RetryPolicy};
use crate::db::{candidates, subjects};
use crate::models::{normalize_title, NewCandidate};

pub use crate::db::subjects::Subject;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Catalog request failed for format {format} page {page}: {source}")]
    Catalog {
        format: String,
        page: u32,
        #[source]
        source: CatalogError,
    },

    #[error("Catalog still rate limited after {cooldowns} cool-downs (format {format} page {page})")]
    CooldownExhausted {
        format: String,
        page: u32,
        cooldowns: u32,
    },

    #[error("Catalog listing for format {format} exceeds {max_pages} pages")]
    PageLimitExceeded { format: String, max_pages: u32 },

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error(transparent)]
    Database(#[from] spindle_common::Error),
}

/// Counts reported by one discovery run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub subject: String,
    /// Entries returned by the catalog across all pages and formats
    pub discovered: usize,
    /// Entries dropped for a non-primary role
    pub filtered: usize,
    pub inserted: usize,
    /// Title duplicates within the run plus rows that already existed
    pub skipped: usize,
    /// Candidates known for the subject after the run
    pub known_items: i64,
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub formats: Vec<String>,
    pub retry: RetryPolicy,
    pub cooldown: Duration,
    pub max_cooldowns: u32,
    /// Pages read per format before giving up
    pub max_pages: u32,
}

pub struct DiscoveryStage {
    db: SqlitePool,
    catalog: Arc<dyn CatalogSource>,
    limiter: Arc<ApiRateLimiter>,
    event_bus: EventBus,
    settings: DiscoverySettings,
}

impl DiscoveryStage {
    pub fn new(
        db: SqlitePool,
        catalog: Arc<dyn CatalogSource>,
        limiter: Arc<ApiRateLimiter>,
        event_bus: EventBus,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            db,
            catalog,
            limiter,
            event_bus,
            settings,
        }
    }

    /// Discover every release of `subject` and write new candidates
    pub async fn run(&self, subject: &Subject) -> Result<DiscoveryReport, DiscoveryError> {
        if subject.name.trim().is_empty() {
            return Err(DiscoveryError::InvalidSubject("subject name is empty".into()));
        }
        if subject.catalog_id.trim().is_empty() {
            return Err(DiscoveryError::InvalidSubject("catalog_id is empty".into()));
        }

        tracing::info!(
            subject = %subject.name,
            catalog_id = %subject.catalog_id,
            formats = ?self.settings.formats,
            "Starting discovery"
        );

        let mut releases = Vec::new();
        for format in &self.settings.formats {
            let fetched = self.fetch_all_pages(&subject.catalog_id, format).await?;
            tracing::debug!(subject = %subject.name, format = %format, count = fetched.len(), "Format listing fetched");
            releases.extend(fetched);
        }

        let mut report = DiscoveryReport {
            subject: subject.name.clone(),
            discovered: releases.len(),
            ..Default::default()
        };

        let primary: Vec<CatalogRelease> = releases
            .into_iter()
            .filter(|r| {
                let keep = r.is_primary();
                if !keep {
                    report.filtered += 1;
                }
                keep
            })
            .collect();

        let mut seen_titles = HashSet::new();
        for release in primary {
            if !seen_titles.insert(normalize_title(&release.title)) {
                report.skipped += 1;
                continue;
            }

            let candidate = to_candidate(&subject.name, &release);
            if candidates::insert_if_absent(&self.db, &candidate).await? {
                report.inserted += 1;
            } else {
                report.skipped += 1;
            }
        }

        subjects::mark_discovered(&self.db, subject).await?;
        report.known_items = subjects::known_item_count(&self.db, &subject.name).await?;

        tracing::info!(
            subject = %subject.name,
            discovered = report.discovered,
            filtered = report.filtered,
            inserted = report.inserted,
            skipped = report.skipped,
            known_items = report.known_items,
            "Discovery complete"
        );

        self.event_bus.emit_lossy(PipelineEvent::DiscoveryCompleted {
            subject: subject.name.clone(),
            discovered: report.discovered,
            inserted: report.inserted,
            skipped: report.skipped,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    async fn fetch_all_pages(
        &self,
        catalog_id: &str,
        format: &str,
    ) -> Result<Vec<CatalogRelease>, DiscoveryError> {
        let mut releases = Vec::new();
        let mut page_number = 1;

        loop {
            let page = self.fetch_page(catalog_id, format, page_number).await?;
            let has_next = page.has_next();
            releases.extend(page.releases);

            if !has_next {
                break;
            }
            if page_number >= self.settings.max_pages {
                tracing::error!(
                    catalog_id,
                    format,
                    max_pages = self.settings.max_pages,
                    "Catalog listing exceeds the page limit"
                );
                return Err(DiscoveryError::PageLimitExceeded {
                    format: format.to_string(),
                    max_pages: self.settings.max_pages,
                });
            }
            page_number += 1;
        }

        Ok(releases)
    }

    /// One page, honoring 429 with a cool-down before re-requesting it
    async fn fetch_page(
        &self,
        catalog_id: &str,
        format: &str,
        page: u32,
    ) -> Result<CatalogPage, DiscoveryError> {
        let mut cooldowns = 0;

        loop {
            self.limiter.acquire().await;

            let result = invoke_with_retry("catalog page fetch", &self.settings.retry, || {
                self.catalog.fetch_page(catalog_id, format, page)
            })
            .await;

            match result {
                Ok(page) => return Ok(page),
                Err(CatalogError::RateLimited) => {
                    if cooldowns >= self.settings.max_cooldowns {
                        return Err(DiscoveryError::CooldownExhausted {
                            format: format.to_string(),
                            page,
                            cooldowns,
                        });
                    }
                    cooldowns += 1;
                    tracing::warn!(
                        catalog_id,
                        format,
                        page,
                        cooldown_ms = self.settings.cooldown.as_millis() as u64,
                        cooldowns,
                        "Catalog rate limited, cooling down before re-requesting page"
                    );
                    tokio::time::sleep(self.settings.cooldown).await;
                }
                Err(source) => {
                    return Err(DiscoveryError::Catalog {
                        format: format.to_string(),
                        page,
                        source,
                    })
                }
            }
        }
    }
}

fn to_candidate(subject: &str, release: &CatalogRelease) -> NewCandidate {
    NewCandidate {
        external_id: release.id.to_string(),
        subject: subject.to_string(),
        title: release.title.trim().to_string(),
        year: release.year.filter(|y| *y > 0),
        format: release.format.clone(),
        label: release.label.clone(),
        artwork_url: release.artwork_url(),
    }
}
