//! Configuration for unitstore

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the store file
    #[serde(rename = "store-path", default = "default_store_path")]
    pub store_path: PathBuf,
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("unitstore")
        .join(crate::DEFAULT_STORE_FILE)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            Some(PathBuf::from("unitstore.yml")),
            dirs::config_dir().map(|p| p.join("unitstore").join("config.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_path_sets_store_path() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("unitstore.yml");
        let store_path = temp.path().join("cache.json");
        std::fs::write(&config_path, format!("store-path: {}\n", store_path.display())).unwrap();

        let loaded = Config::load(Some(&config_path)).unwrap();
        assert_eq!(loaded.store_path, temp.path().join("cache.json"));
    }

    #[test]
    fn test_missing_key_uses_default() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("unitstore.yml");
        std::fs::write(&config_path, "{}\n").unwrap();

        let loaded = Config::load(Some(&config_path)).unwrap();
        assert!(loaded.store_path.ends_with(crate::DEFAULT_STORE_FILE));
    }
}
