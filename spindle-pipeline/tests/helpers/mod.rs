//! Shared fixtures for spindle-pipeline integration tests
//!
//! Fakes stand in for the catalog API and the generation service; every test
//! gets its own SQLite file in a temp directory.

#![allow(dead_code)]

use async_trait::async_trait;
use spindle_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use spindle_pipeline::config::PipelineTimings;
use spindle_pipeline::models::{ImportQueueRecord, WorkItem};
use spindle_pipeline::services::catalog_client::Pagination;
use spindle_pipeline::services::{
    CatalogError, CatalogPage, CatalogRelease, CatalogSource, Collaborators, ContentGenerator,
    GenerationOutcome, GeneratorError, JobLaunchError, JobLauncher, PipelineServices,
};
use spindle_pipeline::AppState;

pub const FORMATS: [&str; 2] = ["Vinyl", "CD"];

/// Zero delays, with a short real poll interval so monitors yield between polls
pub fn test_timings() -> PipelineTimings {
    PipelineTimings {
        monitor_poll_interval: Duration::from_millis(20),
        monitor_max_iterations: 500,
        ..PipelineTimings::immediate()
    }
}

pub fn release(id: u64, title: &str) -> CatalogRelease {
    CatalogRelease {
        id,
        title: title.to_string(),
        year: Some(1970),
        format: Some("LP".to_string()),
        label: Some("Blue Note".to_string()),
        role: Some("Main".to_string()),
        thumb: Some(format!("https://img.example/{}.jpg", id)),
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Serves fixed listings per format, split into pages
#[derive(Default)]
pub struct FakeCatalog {
    pages: Mutex<HashMap<String, Vec<Vec<CatalogRelease>>>>,
    rate_limited_responses: AtomicU32,
    failing_formats: Mutex<HashSet<String>>,
    calls: AtomicU32,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing for `format`, split into pages of `per_page`
    pub fn with_listing(self, format: &str, releases: Vec<CatalogRelease>, per_page: usize) -> Self {
        let pages = releases
            .chunks(per_page.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        self.pages
            .lock()
            .unwrap()
            .insert(format.to_string(), pages);
        self
    }

    /// Answer the next `count` requests with HTTP 429
    pub fn rate_limit_next(&self, count: u32) {
        self.rate_limited_responses.store(count, Ordering::SeqCst);
    }

    /// Every request for `format` fails with a non-retryable API error
    pub fn fail_format(&self, format: &str) {
        self.failing_formats
            .lock()
            .unwrap()
            .insert(format.to_string());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn fetch_page(
        &self,
        _catalog_id: &str,
        format: &str,
        page: u32,
    ) -> Result<CatalogPage, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self
            .rate_limited_responses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CatalogError::RateLimited);
        }

        if self.failing_formats.lock().unwrap().contains(format) {
            return Err(CatalogError::Api(400, "bad format filter".to_string()));
        }

        let pages = self.pages.lock().unwrap();
        let listing = pages.get(format).cloned().unwrap_or_default();
        let total_pages = listing.len().max(1) as u32;
        let releases = listing
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_default();

        Ok(CatalogPage {
            pagination: Pagination {
                page,
                pages: total_pages,
            },
            releases,
        })
    }
}

// ---------------------------------------------------------------------------
// Job launcher
// ---------------------------------------------------------------------------

/// Starts jobs with sequential ids; items whose payload has `"fail": true`
/// fail with a network error on every attempt, and `"delay_ms": n` holds the
/// start for that long
#[derive(Default)]
pub struct FakeLauncher {
    next_id: AtomicU32,
    calls: AtomicU32,
    calls_per_item: Mutex<HashMap<String, u32>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Attempts seen for the item whose payload `name` matches
    pub fn calls_for(&self, name: &str) -> u32 {
        self.calls_per_item
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobLauncher for FakeLauncher {
    async fn start_job(&self, item: &WorkItem) -> Result<String, JobLaunchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(name) = item.payload.get("name").and_then(|v| v.as_str()) {
            *self
                .calls_per_item
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_insert(0) += 1;
        }

        if let Some(delay) = item.payload.get("delay_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if item.payload.get("fail").and_then(|v| v.as_bool()) == Some(true) {
            return Err(JobLaunchError::Network("connection reset by peer".to_string()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("job-{}", n))
    }
}

pub fn work_item(name: &str, fail: bool) -> WorkItem {
    WorkItem {
        item_type: "generate".to_string(),
        payload: serde_json::json!({ "name": name, "fail": fail }),
    }
}

/// Work item whose start takes `delay_ms`
pub fn slow_work_item(name: &str, delay_ms: u64) -> WorkItem {
    WorkItem {
        item_type: "generate".to_string(),
        payload: serde_json::json!({ "name": name, "delay_ms": delay_ms }),
    }
}

// ---------------------------------------------------------------------------
// Content generator
// ---------------------------------------------------------------------------

/// Plays back scripted results, then answers `Created`
#[derive(Default)]
pub struct FakeGenerator {
    script: Mutex<VecDeque<Result<GenerationOutcome, GeneratorError>>>,
    calls: AtomicU32,
    delay: Mutex<Duration>,
    external_ids: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<GenerationOutcome, GeneratorError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every call takes `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// External ids as received, in call order
    pub fn external_ids(&self) -> Vec<String> {
        self.external_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(
        &self,
        record: &ImportQueueRecord,
    ) -> Result<GenerationOutcome, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.external_ids
            .lock()
            .unwrap()
            .push(record.external_id.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(GenerationOutcome::Created))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct TestPipeline {
    pub dir: TempDir,
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub timings: PipelineTimings,
    pub services: PipelineServices,
    pub catalog: Arc<FakeCatalog>,
    pub launcher: Arc<FakeLauncher>,
    pub generator: Arc<FakeGenerator>,
    pub shutdown: CancellationToken,
}

impl TestPipeline {
    pub async fn new() -> Self {
        Self::with(FakeCatalog::new(), test_timings()).await
    }

    pub async fn with_catalog(catalog: FakeCatalog) -> Self {
        Self::with(catalog, test_timings()).await
    }

    pub async fn with(catalog: FakeCatalog, timings: PipelineTimings) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = open_db(&dir).await;
        Self::on_db(dir, db, catalog, timings)
    }

    /// Wire services onto an existing database (used to simulate a restart)
    pub fn on_db(dir: TempDir, db: SqlitePool, catalog: FakeCatalog, timings: PipelineTimings) -> Self {
        let event_bus = EventBus::new(100);
        let catalog = Arc::new(catalog);
        let launcher = Arc::new(FakeLauncher::new());
        let generator = Arc::new(FakeGenerator::new());
        let shutdown = CancellationToken::new();

        let services = PipelineServices::new(
            db.clone(),
            event_bus.clone(),
            &timings,
            Collaborators {
                catalog: catalog.clone(),
                launcher: launcher.clone(),
                generator: generator.clone(),
            },
            FORMATS.iter().map(|f| f.to_string()).collect(),
            shutdown.clone(),
        );

        Self {
            dir,
            db,
            event_bus,
            timings,
            services,
            catalog,
            launcher,
            generator,
            shutdown,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.db.clone(),
            self.event_bus.clone(),
            self.services.clone(),
            self.timings.clone(),
            10,
        )
    }

    pub fn router(&self) -> axum::Router {
        spindle_pipeline::build_router(self.app_state())
    }
}

pub async fn open_db(dir: &TempDir) -> SqlitePool {
    spindle_common::db::init_database(&dir.path().join("spindle.db"))
        .await
        .expect("Failed to initialize test database")
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
