//! Configuration resolution for the pipeline
//!
//! Secrets resolve with Database → ENV → TOML priority. Timings live in the
//! `settings` table so operators can tune them without a restart of the
//! surrounding deployment tooling.

use spindle_common::config::TomlConfig;
use spindle_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{info, warn};

use crate::db::settings;

pub const CATALOG_TOKEN_ENV: &str = "SPINDLE_CATALOG_TOKEN";
pub const GENERATOR_TOKEN_ENV: &str = "SPINDLE_GENERATOR_TOKEN";

/// Upper bound for any `batchSize`/`count` request parameter
pub const MAX_BATCH_SIZE: u32 = 50;

/// Clamp a requested batch size to `[1, MAX_BATCH_SIZE]`
pub fn clamp_batch_size(requested: Option<u32>, default: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, MAX_BATCH_SIZE)
}

/// Timings and budgets used by every stage
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTimings {
    /// Retry wrapper base delay (doubles per attempt)
    pub retry_base_delay: Duration,
    /// Attempts per remote call, including the first
    pub retry_max_attempts: u32,
    /// Minimum spacing between catalog page requests
    pub catalog_page_delay: Duration,
    /// Wait after an HTTP 429 before re-issuing the same page
    pub catalog_cooldown: Duration,
    /// Cool-downs tolerated for a single page before giving up
    pub catalog_max_cooldowns: u32,
    /// Pages read per format before a listing is treated as runaway
    pub catalog_max_pages: u32,
    /// Minimum spacing between child job starts
    pub dispatch_interval: Duration,
    pub monitor_poll_interval: Duration,
    pub monitor_max_iterations: u32,
    /// Hold before a sequential invocation returns
    pub import_hold: Duration,
    pub import_max_retries: u32,
    /// Age after which a `processing` import record is returned to `pending`
    pub import_claim_lease: Duration,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(5000),
            retry_max_attempts: 3,
            catalog_page_delay: Duration::from_millis(1000),
            catalog_cooldown: Duration::from_millis(60_000),
            catalog_max_cooldowns: 5,
            catalog_max_pages: 500,
            dispatch_interval: Duration::from_millis(5000),
            monitor_poll_interval: Duration::from_millis(60_000),
            monitor_max_iterations: 120,
            import_hold: Duration::from_millis(30_000),
            import_max_retries: 3,
            import_claim_lease: Duration::from_millis(600_000),
        }
    }
}

impl PipelineTimings {
    /// Every delay zeroed; used by tests and dry runs
    pub fn immediate() -> Self {
        Self {
            retry_base_delay: Duration::ZERO,
            catalog_page_delay: Duration::ZERO,
            catalog_cooldown: Duration::ZERO,
            dispatch_interval: Duration::ZERO,
            monitor_poll_interval: Duration::ZERO,
            import_hold: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Load from the settings table, defaulting any missing key
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let defaults = Self::default();
        let ms = |d: Duration| d.as_millis() as u64;

        Ok(Self {
            retry_base_delay: Duration::from_millis(
                settings::get_or(db, "retry_base_delay_ms", ms(defaults.retry_base_delay)).await?,
            ),
            retry_max_attempts: settings::get_or(
                db,
                "retry_max_attempts",
                defaults.retry_max_attempts,
            )
            .await?
            .max(1),
            catalog_page_delay: Duration::from_millis(
                settings::get_or(db, "catalog_page_delay_ms", ms(defaults.catalog_page_delay))
                    .await?,
            ),
            catalog_cooldown: Duration::from_millis(
                settings::get_or(db, "catalog_cooldown_ms", ms(defaults.catalog_cooldown)).await?,
            ),
            catalog_max_cooldowns: settings::get_or(
                db,
                "catalog_max_cooldowns",
                defaults.catalog_max_cooldowns,
            )
            .await?,
            catalog_max_pages: settings::get_or(db, "catalog_max_pages", defaults.catalog_max_pages)
                .await?
                .max(1),
            dispatch_interval: Duration::from_millis(
                settings::get_or(db, "dispatch_interval_ms", ms(defaults.dispatch_interval))
                    .await?,
            ),
            monitor_poll_interval: Duration::from_millis(
                settings::get_or(
                    db,
                    "monitor_poll_interval_ms",
                    ms(defaults.monitor_poll_interval),
                )
                .await?,
            ),
            monitor_max_iterations: settings::get_or(
                db,
                "monitor_max_iterations",
                defaults.monitor_max_iterations,
            )
            .await?,
            import_hold: Duration::from_millis(
                settings::get_or(db, "import_hold_ms", ms(defaults.import_hold)).await?,
            ),
            import_max_retries: settings::get_or(
                db,
                "import_max_retries",
                defaults.import_max_retries,
            )
            .await?
            .max(1),
            import_claim_lease: Duration::from_millis(
                settings::get_or(db, "import_claim_lease_ms", ms(defaults.import_claim_lease))
                    .await?,
            ),
        })
    }
}

/// Resolve the catalog bearer token from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML. A missing token is a configuration
/// error: discovery cannot run without it.
pub async fn resolve_catalog_token(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<String> {
    let db_token = settings::get_catalog_token(db).await?;
    let env_token = std::env::var(CATALOG_TOKEN_ENV).ok();
    let toml_token = toml_config.catalog.token.clone();

    resolve_tiers("Catalog token", db_token, env_token, toml_token).ok_or_else(|| {
        Error::Config(format!(
            "Catalog token not configured. Set it in the settings table (key '{}'), \
             the {} environment variable, or [catalog] token in the TOML config",
            settings::CATALOG_TOKEN_KEY,
            CATALOG_TOKEN_ENV
        ))
    })
}

/// Resolve the generation service token; the service may run unauthenticated
pub async fn resolve_generator_token(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    let db_token = settings::get_generator_token(db).await?;
    let env_token = std::env::var(GENERATOR_TOKEN_ENV).ok();
    let toml_token = toml_config.generator.token.clone();

    Ok(resolve_tiers("Generator token", db_token, env_token, toml_token))
}

fn resolve_tiers(
    label: &str,
    db_value: Option<String>,
    env_value: Option<String>,
    toml_value: Option<String>,
) -> Option<String> {
    let candidates = [
        ("database", db_value),
        ("environment", env_value),
        ("TOML", toml_value),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, value)| value.filter(|v| is_valid_key(v)).map(|v| (source, v)))
        .collect();

    if valid.len() > 1 {
        let sources: Vec<&str> = valid.iter().map(|(s, _)| *s).collect();
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            label,
            sources.join(", "),
            sources[0]
        );
    }

    valid.into_iter().next().map(|(source, value)| {
        info!("{} loaded from {}", label, source);
        value
    })
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    async fn setup() -> (tempfile::TempDir, Pool<Sqlite>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = spindle_common::db::init_database(&dir.path().join("spindle.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    #[test]
    fn test_clamp_batch_size() {
        assert_eq!(clamp_batch_size(None, 10), 10);
        assert_eq!(clamp_batch_size(Some(0), 10), 1);
        assert_eq!(clamp_batch_size(Some(500), 10), 50);
        assert_eq!(clamp_batch_size(Some(25), 10), 25);
    }

    #[tokio::test]
    async fn test_timings_load_seeded_defaults() {
        let (_dir, pool) = setup().await;
        let timings = PipelineTimings::load(&pool).await.unwrap();
        assert_eq!(timings, PipelineTimings::default());
    }

    #[tokio::test]
    async fn test_timings_follow_settings_overrides() {
        let (_dir, pool) = setup().await;
        settings::set_setting(&pool, "monitor_poll_interval_ms", 250).await.unwrap();
        settings::set_setting(&pool, "retry_max_attempts", 0).await.unwrap();

        let timings = PipelineTimings::load(&pool).await.unwrap();
        assert_eq!(timings.monitor_poll_interval, Duration::from_millis(250));
        // At least one attempt is always made
        assert_eq!(timings.retry_max_attempts, 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_catalog_token_priority() {
        let (_dir, pool) = setup().await;
        let mut toml = TomlConfig::default();
        toml.catalog.token = Some("from-toml".to_string());

        std::env::remove_var(CATALOG_TOKEN_ENV);
        assert_eq!(resolve_catalog_token(&pool, &toml).await.unwrap(), "from-toml");

        std::env::set_var(CATALOG_TOKEN_ENV, "from-env");
        assert_eq!(resolve_catalog_token(&pool, &toml).await.unwrap(), "from-env");

        settings::set_catalog_token(&pool, "from-db".to_string()).await.unwrap();
        assert_eq!(resolve_catalog_token(&pool, &toml).await.unwrap(), "from-db");

        std::env::remove_var(CATALOG_TOKEN_ENV);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_catalog_token_is_config_error() {
        let (_dir, pool) = setup().await;
        std::env::remove_var(CATALOG_TOKEN_ENV);
        let mut toml = TomlConfig::default();
        toml.catalog.token = Some("   ".to_string());

        let result = resolve_catalog_token(&pool, &toml).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
