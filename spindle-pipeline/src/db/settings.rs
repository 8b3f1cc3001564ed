//! Settings database operations
//!
//! Key/value accessors over the `settings` table. Pipeline timings are
//! seeded by `spindle_common::db::init_database`; API tokens are only present
//! once an operator stores them.

use sqlx::{Pool, Sqlite};
use spindle_common::{Error, Result};

pub const CATALOG_TOKEN_KEY: &str = "catalog_token";
pub const GENERATOR_TOKEN_KEY: &str = "generator_token";

pub async fn get_catalog_token(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, CATALOG_TOKEN_KEY).await
}

pub async fn set_catalog_token(db: &Pool<Sqlite>, token: String) -> Result<()> {
    set_setting(db, CATALOG_TOKEN_KEY, token).await
}

pub async fn get_generator_token(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, GENERATOR_TOKEN_KEY).await
}

/// Read a setting, falling back to `default` when absent
pub async fn get_or<T>(db: &Pool<Sqlite>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_setting(db, key).await.map(|opt| opt.unwrap_or(default))
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
