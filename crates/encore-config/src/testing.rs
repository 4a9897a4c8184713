//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Temporary cache and datastore roots
//! - A matching [`Config`](crate::Config)
//! - Helpers for planting files behind a store's back
//!
//! # Usage
//!
//! ```ignore
//! use encore_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     // env.cache_root and env.data_root are isolated and removed on drop
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Parent of every cache directory
    pub cache_root: PathBuf,
    /// Parent of every datastore directory
    pub data_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let cache_root = root.join("cache");
        let data_root = root.join("data");
        std::fs::create_dir_all(&cache_root)?;
        std::fs::create_dir_all(&data_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            cache_root,
            data_root,
            test_id,
        })
    }

    /// Config pointing at this environment's roots
    pub fn config(&self) -> crate::Config {
        let mut cfg = crate::Config::default();
        cfg.storage.cache_root = self.cache_root.clone();
        cfg.storage.data_root = self.data_root.clone();
        cfg
    }

    /// Directory a cache named `name` would own
    pub fn cache_dir(&self, name: &str) -> PathBuf {
        self.cache_root.join(format!("{}-cache", name))
    }

    /// Directory a datastore named `name` would own
    pub fn data_dir(&self, name: &str) -> PathBuf {
        self.data_root.join(format!("{}-data", name))
    }

    /// Write a file directly into `dir`, bypassing any store
    pub fn plant_file(&self, dir: &Path, name: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Names of regular files in `dir`, sorted
    pub fn list_files(&self, dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
