//! Configuration loading and resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`SCP_INGEST_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error: a warning is logged and compiled
//! defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "SCP_INGEST_CONFIG";
/// Environment variable overriding the database path
pub const ENV_DATABASE_PATH: &str = "SCP_INGEST_DATABASE";
/// Environment variable overriding the batch service endpoint
pub const ENV_BATCH_ENDPOINT: &str = "SCP_INGEST_BATCH_ENDPOINT";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "SCP_INGEST_LOG_LEVEL";

/// Top-level configuration for the ingest orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub batch: BatchConfig,
    pub differential_expression: DeConfig,
    pub reconcile: ReconcileConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Upper bound on lock-contention retries for batch status updates
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_lock_wait_ms: 5000,
        }
    }
}

/// Remote batch-compute service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub endpoint: String,
    pub machine_type: String,
    pub request_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8085".to_string(),
            machine_type: "n2d-highmem-8".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Differential expression eligibility settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeConfig {
    /// Maximum distinct group values an annotation may have and still be visualized
    pub visualization_threshold: usize,
    /// Case-insensitive pattern for cell-type-like annotation names
    pub cell_type_pattern: String,
    /// Case-insensitive pattern for clustering-result annotation names
    pub clustering_pattern: String,
    /// Case-insensitive pattern for names never eligible
    pub exclude_pattern: String,
    /// Requester recorded on jobs submitted by scheduled backfills
    pub service_requester: String,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            visualization_threshold: 200,
            cell_type_pattern: r"cell.*type".to_string(),
            clustering_pattern: r"(clust|louvain|leiden)".to_string(),
            exclude_pattern: r"(enrichment__cell_type|author_cell_type_custom)".to_string(),
            service_requester: "scp-service@localhost".to_string(),
        }
    }
}

/// Stale parse-claim sweep settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub stale_after_minutes: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: 24 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl IngestConfig {
    /// Resolve configuration from CLI, environment, TOML and defaults
    ///
    /// `cli_config` names an explicit config file; when it is given the file
    /// must exist and parse. Config files found through the environment or
    /// the platform default location degrade to defaults on read failure.
    pub fn resolve(cli_config: Option<&Path>) -> Result<Self> {
        let mut config = match cli_config {
            Some(path) => Self::load(path)?,
            None => match config_file_candidate() {
                Some(path) if path.exists() => match Self::load(&path) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Ignoring unreadable config file, using defaults");
                        Self::default()
                    }
                },
                Some(path) => {
                    warn!(path = %path.display(), "Config file not found, using compiled defaults");
                    Self::default()
                }
                None => Self::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Environment variables win over the TOML file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            if !path.trim().is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }
        if let Ok(endpoint) = std::env::var(ENV_BATCH_ENDPOINT) {
            if !endpoint.trim().is_empty() {
                self.batch.endpoint = endpoint;
            }
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Database path with a command-line override applied
    pub fn database_path(&self, cli_arg: Option<&Path>) -> PathBuf {
        match cli_arg {
            Some(path) => path.to_path_buf(),
            None => self.database.path.clone(),
        }
    }
}

/// Serialize a config to TOML and write it, creating parent directories
pub fn write_config(config: &IngestConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

fn config_file_candidate() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|d| d.join("scp").join("ingest.toml"))
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("scp-ingest").join("ingest.db"))
        .unwrap_or_else(|| PathBuf::from("./scp_data/ingest.db"))
}
