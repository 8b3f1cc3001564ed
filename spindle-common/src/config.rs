//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable `SPINDLE_ROOT_FOLDER`
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "SPINDLE_ROOT_FOLDER";

/// Database file created inside the root folder
pub const DATABASE_FILE_NAME: &str = "spindle.db";

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// External catalog API section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the catalog REST API
    #[serde(default = "default_catalog_base_url")]
    pub base_url: String,
    /// Bearer token (lowest priority source, database and ENV win)
    #[serde(default)]
    pub token: Option<String>,
    /// Format filters queried independently per subject
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    /// Page size requested from the catalog
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_base_url(),
            token: None,
            formats: default_formats(),
            per_page: default_per_page(),
        }
    }
}

fn default_catalog_base_url() -> String {
    "https://api.discogs.com".to_string()
}

fn default_formats() -> Vec<String> {
    vec!["Vinyl".to_string(), "CD".to_string(), "Cassette".to_string()]
}

fn default_per_page() -> u32 {
    100
}

/// Generation service section (job starts and sequential generation)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of the generation service
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer token (lowest priority source)
    #[serde(default)]
    pub token: Option<String>,
}

/// In-process scheduler section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run promotion and sequential processing on timers
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between promotion runs
    #[serde(default = "default_promotion_interval")]
    pub promotion_interval_secs: u64,
    /// Batch size used by scheduled promotion runs
    #[serde(default = "default_promotion_batch_size")]
    pub promotion_batch_size: u32,
    /// Seconds between sequential processor invocations
    #[serde(default = "default_import_interval")]
    pub import_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            promotion_interval_secs: default_promotion_interval(),
            promotion_batch_size: default_promotion_batch_size(),
            import_interval_secs: default_import_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_promotion_interval() -> u64 {
    900
}

fn default_promotion_batch_size() -> u32 {
    10
}

fn default_import_interval() -> u64 {
    120
}

/// Complete TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database
    #[serde(default)]
    pub root_folder: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Load TOML config from a path; a missing file yields defaults
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Default config file location: `~/.config/spindle/spindle.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("spindle").join("spindle.toml"))
        .unwrap_or_else(|| PathBuf::from("spindle.toml"))
}

/// User-Agent sent to every external API
pub fn get_user_agent() -> String {
    format!(
        "Spindle/{} (https://github.com/spindle-catalog/spindle)",
        env!("CARGO_PKG_VERSION")
    )
}

/// Resolves the root folder from the four configuration tiers
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<String>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>, toml_config: &TomlConfig) -> Self {
        Self {
            cli_arg,
            toml_root: toml_config.root_folder.clone(),
        }
    }

    /// Resolve using CLI → ENV → TOML → OS default
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
            warn!("{} is set but empty, ignoring", ROOT_FOLDER_ENV);
        }

        if let Some(path) = &self.toml_root {
            info!("Root folder from TOML config: {}", path);
            return PathBuf::from(path);
        }

        let fallback = get_default_root_folder();
        info!("Root folder defaulted to {}", fallback.display());
        fallback
    }
}

/// Creates the root folder and locates the database inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("spindle"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/spindle"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("spindle"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/spindle"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("spindle"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\spindle"))
    } else {
        PathBuf::from("./spindle_data")
    }
}
