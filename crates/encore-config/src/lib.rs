//! # encore-config
//!
//! Configuration management for the Encore storage subsystem.
//!
//! Loads configuration from:
//! 1. `~/.encore/config.toml` (global)
//! 2. `.encore/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! The loaded [`Config`] is a plain value. Callers load it once at start-up
//! and pass the relevant sections down to the stores, the worker runtime and
//! the downloader.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default soft limit for a cache directory (512 MiB)
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 512 * 1024 * 1024;

/// Default byte-range size for parallel downloads (10 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub workers: WorkerConfig,
    pub download: DownloadConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let project = Path::new(".encore/config.toml");
        let mut config = Self::load_from(global.as_deref(), Some(project))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load config from explicit global and project files.
    ///
    /// Missing files are skipped. Keys present in the project file replace
    /// the same keys from the global file, table by table.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)?;
            let table: toml::Table = toml::from_str(&contents)?;
            merge_tables(&mut merged, table);
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Load config from a single file, ignoring standard locations.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(None, Some(path))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Global config path: ~/.encore/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".encore/config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("ENCORE_CACHE_DIR") {
            self.storage.cache_root = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("ENCORE_DATA_DIR") {
            self.storage.data_root = PathBuf::from(path);
        }
        if let Ok(value) = std::env::var("ENCORE_CACHE_MAX_BYTES") {
            self.storage.cache_max_bytes =
                value.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "ENCORE_CACHE_MAX_BYTES",
                    value,
                })?;
        }
        if let Ok(value) = std::env::var("ENCORE_THREADS") {
            let threads = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "ENCORE_THREADS",
                value,
            })?;
            self.workers.threads = Some(threads);
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Recursively overlay `overlay` onto `base`.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Parent directory of every cache store (`<root>/<name>-cache`)
    pub cache_root: PathBuf,
    /// Parent directory of every datastore (`<root>/<name>-data`)
    pub data_root: PathBuf,
    /// Soft upper bound on the aggregate size of one cache
    pub cache_max_bytes: u64,
    /// Run an integrity sweep when a store is opened
    pub reconcile_on_open: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let cache_root = dirs::cache_dir()
            .map(|d| d.join("encore"))
            .unwrap_or_else(|| PathBuf::from("~/.encore/cache"));
        let data_root = dirs::data_dir()
            .map(|d| d.join("encore"))
            .unwrap_or_else(|| PathBuf::from("~/.encore/data"));
        Self {
            cache_root,
            data_root,
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            reconcile_on_open: true,
        }
    }
}

/// Worker pool and async runtime sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of pool threads (None = auto)
    pub threads: Option<usize>,
    /// Maximum in-flight jobs on the async runtime
    pub async_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: None,
            async_concurrency: 8,
        }
    }
}

/// Downloader tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Byte-range size for parallel downloads
    pub chunk_size: u64,
    /// Maximum concurrent range requests
    pub max_workers: usize,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: 4,
            timeout_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of error, warn, info, debug, trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.cache_max_bytes, DEFAULT_CACHE_MAX_BYTES);
        assert_eq!(config.download.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.workers.async_concurrency > 0);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[download]"));
        assert!(toml_str.contains("chunk_size"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_merge_tables_is_per_key() {
        let mut base: toml::Table =
            toml::from_str("[download]\nchunk_size = 1\nmax_workers = 2\n").unwrap();
        let overlay: toml::Table = toml::from_str("[download]\nmax_workers = 9\n").unwrap();
        merge_tables(&mut base, overlay);

        let config: Config = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.download.chunk_size, 1);
        assert_eq!(config.download.max_workers, 9);
    }

    #[test]
    fn test_expand_home() {
        let plain = Path::new("/var/lib/encore");
        assert_eq!(expand_home(plain), PathBuf::from("/var/lib/encore"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/music")), home.join("music"));
        }
    }
}
