//! Named store handles, opened on first reference.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use encore_config::{expand_home, StorageConfig};
use parking_lot::Mutex;

use crate::cache::Cache;
use crate::clock::{Clock, SystemClock};
use crate::datastore::Datastore;
use crate::error::Result;
use crate::key::validate_key;
use crate::store::StoreOptions;

/// Owns every cache and datastore of a process, keyed by name.
///
/// Handles are `Arc`s; callers pass them explicitly to whoever needs them.
#[derive(Debug)]
pub struct StoreRegistry {
    cache_root: PathBuf,
    data_root: PathBuf,
    cache_max_bytes: u64,
    reconcile_on_open: bool,
    clock: Arc<dyn Clock>,
    caches: Mutex<HashMap<String, Arc<Cache>>>,
    datastores: Mutex<HashMap<String, Arc<Datastore>>>,
}

impl StoreRegistry {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            cache_root: expand_home(&config.cache_root),
            data_root: expand_home(&config.data_root),
            cache_max_bytes: config.cache_max_bytes,
            reconcile_on_open: config.reconcile_on_open,
            clock: Arc::new(SystemClock),
            caches: Mutex::new(HashMap::new()),
            datastores: Mutex::new(HashMap::new()),
        }
    }

    /// Use `clock` for every store opened from now on.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Directory of the cache called `name`
    pub fn cache_dir(&self, name: &str) -> PathBuf {
        self.cache_root.join(format!("{}-cache", name))
    }

    /// Directory of the datastore called `name`
    pub fn data_dir(&self, name: &str) -> PathBuf {
        self.data_root.join(format!("{}-data", name))
    }

    /// The cache called `name`, opened on first use.
    pub fn cache(&self, name: &str) -> Result<Arc<Cache>> {
        validate_key(name)?;
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.get(name) {
            return Ok(Arc::clone(cache));
        }
        let options = StoreOptions::new(name, self.cache_dir(name))
            .max_bytes(self.cache_max_bytes)
            .reconcile_on_open(self.reconcile_on_open)
            .clock(Arc::clone(&self.clock));
        let cache = Arc::new(Cache::open(options)?);
        caches.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache)
    }

    /// The datastore called `name`, opened on first use.
    pub fn datastore(&self, name: &str) -> Result<Arc<Datastore>> {
        validate_key(name)?;
        let mut datastores = self.datastores.lock();
        if let Some(store) = datastores.get(name) {
            return Ok(Arc::clone(store));
        }
        let options = StoreOptions::new(name, self.data_dir(name))
            .reconcile_on_open(self.reconcile_on_open)
            .clock(Arc::clone(&self.clock));
        let store = Arc::new(Datastore::open(options)?);
        datastores.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Names of the caches opened so far, sorted
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the datastores opened so far, sorted
    pub fn datastore_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datastores.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
