//! Pipeline stages, their external collaborators and shared capabilities

pub mod catalog_client;
pub mod content_generator;
pub mod dedup;
pub mod discovery;
pub mod dispatcher;
pub mod job_launcher;
pub mod monitor;
pub mod promotion;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod sequential;

pub use catalog_client::{CatalogError, CatalogPage, CatalogRelease, CatalogSource, HttpCatalogClient};
pub use content_generator::{ContentGenerator, GenerationOutcome, GeneratorError, HttpContentGenerator};
pub use dedup::{DedupIndex, DedupSource, TableDedupSource};
pub use discovery::{DiscoveryError, DiscoveryReport, DiscoverySettings, DiscoveryStage};
pub use dispatcher::{BatchDispatcher, DispatchReport};
pub use job_launcher::{HttpJobLauncher, JobLaunchError, JobLauncher};
pub use monitor::{CompletionMonitor, MonitorConfig, MonitorOutcome, MonitorRegistry};
pub use promotion::{PromotionReport, PromotionStage};
pub use rate_limiter::ApiRateLimiter;
pub use retry::{invoke_with_retry, RetryPolicy, Retryable};
pub use scheduler::PipelineScheduler;
pub use sequential::{SequentialOutcome, SequentialProcessor};

use spindle_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineTimings;

/// External collaborators, swappable for fakes in tests
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub launcher: Arc<dyn JobLauncher>,
    pub generator: Arc<dyn ContentGenerator>,
}

/// Every stage wired to one database, event bus and set of limiters
#[derive(Clone)]
pub struct PipelineServices {
    pub discovery: Arc<DiscoveryStage>,
    pub promotion: Arc<PromotionStage>,
    pub dispatcher: Arc<BatchDispatcher>,
    pub sequential: Arc<SequentialProcessor>,
    pub monitors: MonitorRegistry,
}

impl PipelineServices {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        timings: &PipelineTimings,
        collaborators: Collaborators,
        catalog_formats: Vec<String>,
        shutdown: CancellationToken,
    ) -> Self {
        let retry = RetryPolicy::from_timings(timings);

        // One limiter per external API, shared by every caller of it
        let catalog_limiter = Arc::new(ApiRateLimiter::new("catalog", timings.catalog_page_delay));
        let generator_limiter =
            Arc::new(ApiRateLimiter::new("generator", timings.dispatch_interval));

        let monitors = MonitorRegistry::new(
            db.clone(),
            event_bus.clone(),
            MonitorConfig::from_timings(timings),
            shutdown,
        );

        let discovery = DiscoveryStage::new(
            db.clone(),
            collaborators.catalog,
            catalog_limiter,
            event_bus.clone(),
            DiscoverySettings {
                formats: catalog_formats,
                retry,
                cooldown: timings.catalog_cooldown,
                max_cooldowns: timings.catalog_max_cooldowns,
                max_pages: timings.catalog_max_pages,
            },
        );

        let promotion = PromotionStage::new(db.clone(), DedupIndex::for_pipeline(&db), event_bus.clone());

        let dispatcher = BatchDispatcher::new(
            db.clone(),
            collaborators.launcher,
            generator_limiter,
            retry,
            event_bus.clone(),
            monitors.clone(),
        );

        let sequential = SequentialProcessor::new(
            db,
            collaborators.generator,
            event_bus,
            timings.import_hold,
            timings.import_claim_lease,
        );

        Self {
            discovery: Arc::new(discovery),
            promotion: Arc::new(promotion),
            dispatcher: Arc::new(dispatcher),
            sequential: Arc::new(sequential),
            monitors,
        }
    }
}
