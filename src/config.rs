//! Configuration module for the embedding index.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `EMBINDEX_` and use double
//! underscores to separate nested levels:
//! - `EMBINDEX_DIMENSIONS=384` sets `dimensions`
//! - `EMBINDEX_SEARCH__TOP_K=20` sets `search.top_k`
//! - `EMBINDEX_LOGGING__LEVEL=debug` sets `logging.level`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, IndexResult};
use crate::vector::{DEFAULT_DIMENSIONS, estimate_limit_by_memory};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding `ids.json` and `embeddings.bin`
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Embedding dimensionality, fixed for the lifetime of an index
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Maximum number of entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Memory budget for embeddings, translated into an entry limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_bytes: Option<u64>,

    /// Query defaults
    #[serde(default)]
    pub search: SearchConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    /// Number of results returned by `search` when not given explicitly
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Similarity threshold for search results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level when no `EMBINDEX_LOG`/`RUST_LOG` filter is set
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".embindex/index")
}
fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}
fn default_top_k() -> usize {
    10
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            dimensions: default_dimensions(),
            limit: None,
            memory_limit_bytes: None,
            search: SearchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".embindex/settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscore stays in the name
            .merge(Env::prefixed("EMBINDEX_").ignore(&["LOG"]).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.embindex/settings.toml` from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".embindex");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> IndexResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| IndexError::ConfigError {
            reason: format!("Failed to serialize settings: {e}"),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| IndexError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The entry limit implied by `limit` and `memory_limit_bytes`, whichever is tighter
    pub fn effective_limit(&self) -> Option<usize> {
        let by_memory = self
            .memory_limit_bytes
            .map(|bytes| estimate_limit_by_memory(self.dimensions, bytes));

        match (self.limit, by_memory) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.dimensions, 128);
        assert_eq!(settings.index_path, PathBuf::from(".embindex/index"));
        assert_eq!(settings.search.top_k, 10);
        assert!(settings.limit.is_none());
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
index_path = "/tmp/embeddings"
dimensions = 384
limit = 5000

[search]
top_k = 25
threshold = 0.5
"#;
        std::fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.index_path, PathBuf::from("/tmp/embeddings"));
        assert_eq!(settings.dimensions, 384);
        assert_eq!(settings.limit, Some(5000));
        assert_eq!(settings.search.top_k, 25);
        assert_eq!(settings.search.threshold, Some(0.5));
        // Unset sections keep their defaults
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(".embindex").join("settings.toml");

        let settings = Settings {
            dimensions: 64,
            limit: Some(10),
            ..Settings::default()
        };
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.dimensions, 64);
        assert_eq!(loaded.limit, Some(10));
    }

    #[test]
    fn test_effective_limit() {
        let mut settings = Settings {
            dimensions: 128,
            ..Settings::default()
        };
        assert_eq!(settings.effective_limit(), None);

        // 128 dims * 4 bytes = 512 bytes per entry
        settings.memory_limit_bytes = Some(512 * 100);
        assert_eq!(settings.effective_limit(), Some(100));

        settings.limit = Some(40);
        assert_eq!(settings.effective_limit(), Some(40));

        settings.limit = Some(400);
        assert_eq!(settings.effective_limit(), Some(100));
    }
}
