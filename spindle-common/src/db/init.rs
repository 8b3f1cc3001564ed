//! Database initialization
//!
//! Creates the pipeline tables on first run and seeds default settings.
//! Every statement is idempotent, so opening an existing database is safe.

use crate::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas apply per connection; WAL lets monitors read while a stage writes
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create every pipeline table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_subjects_table(pool).await?;
    create_source_candidates_table(pool).await?;
    create_generation_queue_table(pool).await?;
    create_content_items_table(pool).await?;
    create_batches_table(pool).await?;
    create_queue_items_table(pool).await?;
    create_import_queue_table(pool).await?;
    create_execution_log_table(pool).await?;
    Ok(())
}

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_subjects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subjects (
            name TEXT PRIMARY KEY,
            catalog_id TEXT NOT NULL,
            last_discovered_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_source_candidates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_candidates (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            subject TEXT NOT NULL,
            title TEXT NOT NULL,
            normalized_title TEXT NOT NULL,
            year INTEGER,
            format TEXT,
            label TEXT,
            artwork_url TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'queued', 'skipped', 'failed')),
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_candidates_status ON source_candidates(status, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_candidates_subject ON source_candidates(subject)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_generation_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generation_queue (
            id TEXT PRIMARY KEY,
            candidate_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            subject_key TEXT NOT NULL,
            title TEXT NOT NULL,
            normalized_title TEXT NOT NULL,
            artwork_url TEXT,
            priority INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            UNIQUE (subject_key, normalized_title)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_content_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_items (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            subject_key TEXT NOT NULL,
            title TEXT NOT NULL,
            normalized_title TEXT NOT NULL,
            external_id TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (subject_key, normalized_title)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'processing'
                CHECK (status IN ('processing', 'completed', 'completed_with_errors',
                                  'failed', 'stalled', 'cancelled')),
            total INTEGER NOT NULL,
            dispatched INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            summary TEXT,
            poll_iterations INTEGER NOT NULL DEFAULT 0,
            next_poll_at TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_queue_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_items (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches(id) ON DELETE CASCADE,
            item_id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
            error_message TEXT,
            created_at TEXT NOT NULL,
            processed_at TEXT,
            UNIQUE (batch_id, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_items_batch ON queue_items(batch_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_import_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_queue (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'completed', 'skipped', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            processed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_import_queue_status ON import_queue(status, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_execution_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stage TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            inserted INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            success INTEGER NOT NULL,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed tunable pipeline timings; existing values are never overwritten
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Retry wrapper
    ensure_setting(pool, "retry_base_delay_ms", "5000").await?;
    ensure_setting(pool, "retry_max_attempts", "3").await?;

    // Catalog discovery
    ensure_setting(pool, "catalog_page_delay_ms", "1000").await?;
    ensure_setting(pool, "catalog_cooldown_ms", "60000").await?;
    ensure_setting(pool, "catalog_max_cooldowns", "5").await?;
    ensure_setting(pool, "catalog_max_pages", "500").await?;

    // Batch dispatch and completion monitoring
    ensure_setting(pool, "dispatch_interval_ms", "5000").await?;
    ensure_setting(pool, "monitor_poll_interval_ms", "60000").await?;
    ensure_setting(pool, "monitor_max_iterations", "120").await?;

    // Sequential import queue
    ensure_setting(pool, "import_hold_ms", "30000").await?;
    ensure_setting(pool, "import_max_retries", "3").await?;
    ensure_setting(pool, "import_claim_lease_ms", "600000").await?;

    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE tolerates concurrent first-run initialization
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;

    Ok(())
}
