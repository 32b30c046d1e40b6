//! gcp-integration configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::identity::{METADATA_URL, READ_BLOCK_SIZE};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relation endpoint name; also namespaces local store keys
    pub endpoint: String,

    /// Charm (application) name published with the instance info
    pub charm: String,

    /// Model UUID published with the instance info, if known
    #[serde(rename = "model-uuid")]
    pub model_uuid: Option<String>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Metadata endpoint configuration
    pub metadata: MetadataConfig,

    /// Local store configuration
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "gcp".to_string(),
            charm: "gcp-integration".to_string(),
            model_uuid: None,
            log_level: None,
            metadata: MetadataConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .gcp-integration.yml
        let local_config = PathBuf::from(".gcp-integration.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/gcp-integration/gcp-integration.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("gcp-integration").join("gcp-integration.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full `load` reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = [
            config_path.cloned(),
            Some(PathBuf::from(".gcp-integration.yml")),
            dirs::config_dir().map(|d| d.join("gcp-integration").join("gcp-integration.yml")),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|p| p.exists())
            .and_then(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Metadata endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Metadata service base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum bytes read from a metadata response
    #[serde(rename = "read-limit")]
    pub read_limit: usize,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: METADATA_URL.to_string(),
            read_limit: READ_BLOCK_SIZE,
            timeout_ms: 10_000,
        }
    }
}

/// Local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON store file
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("gcp-integration")
                .join(unitstore::DEFAULT_STORE_FILE),
        }
    }
}
