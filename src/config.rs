//! Application configuration
//!
//! Loaded from a TOML file. Every field has a default, so a missing file or a
//! partial file both work:
//!
//! ```toml
//! log_level = "debug"
//!
//! [cache]
//! ttl_secs = 600
//! max_entries = 50
//!
//! [retry]
//! base_delay_ms = 500
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Default tracing filter when RUST_LOG is not set
    pub log_level: String,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub extraction: ExtractionConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            extraction: ExtractionConfig::default(),
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Remote data cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Ceiling on stored entries; reaching it evicts the oldest 20%
    pub max_entries: usize,
    pub namespace: String,
    /// Bump to invalidate snapshots written in an older format
    pub version: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60,
            max_entries: 100,
            namespace: "palette-studio-cache".to_string(),
            version: 1,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Storage key of the persisted snapshot, `<namespace>-v<version>`
    pub fn storage_key(&self) -> String {
        format!("{}-v{}", self.namespace, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total loader invocations allowed for one fetch
    pub max_attempts: u32,
    /// Wait before attempt n+1 is `n * base_delay`
    pub base_delay_ms: u64,
    /// Per-attempt timeout
    pub request_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub color_count: usize,
    /// Sample every n-th pixel
    pub quality: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            color_count: 3,
            quality: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://pokeapi.co/api/v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to the platform data directory
    pub data_dir: Option<PathBuf>,
    pub palettes_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            palettes_key: crate::state::library::DEFAULT_PALETTES_KEY.to_string(),
        }
    }
}

impl StorageConfig {
    /// Resolved SQLite database path
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.data_dir {
            Some(dir) => Some(dir.join("palette_studio.db")),
            None => crate::state::SqliteStorage::default_path(),
        }
    }
}

impl StudioConfig {
    /// Default config file location
    ///
    /// - Linux: ~/.config/palette-studio/config.toml
    /// - macOS: ~/Library/Application Support/palette-studio/config.toml
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("palette-studio");
        path.push("config.toml");
        Some(path)
    }

    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: StudioConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load from `path` if given, else from the default location
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".to_string()));
        }
        if self.extraction.color_count == 0 {
            return Err(ConfigError::Invalid("extraction.color_count must be at least 1".to_string()));
        }
        Ok(())
    }
}
