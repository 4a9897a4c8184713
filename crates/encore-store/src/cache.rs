//! Bounded, TTL-aware cache of derived artifacts.
//!
//! # Example
//!
//! ```ignore
//! let cache = Cache::open(StoreOptions::new("images", dir).max_bytes(64 << 20))?;
//! cache.put("cover", png_bytes, PutOptions::new().extension("png"))?;
//! if let Lookup::Hit(Value::Bytes(png)) = cache.get("cover")? { /* ... */ }
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use encore_config::{log_cache_debug, log_cache_info, log_cache_warn};
use tracing::instrument;

use crate::entry::{EntryMeta, Lookup, Statistics, Value};
use crate::error::{Result, StoreError};
use crate::index::{Index, Removal};
use crate::key::{filename_for, normalize_extension, validate_key};
use crate::reconcile::{sweep, OrphanPolicy, ReconcileReport};
use crate::store::{OpenState, StoreCore, StoreOptions, StoreState};

/// Order in which [`Cache::evict`] picks victims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least recently used first
    Lru,
    /// Fewest reads first
    Lfu,
    /// Biggest payload first
    Largest,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "largest" => Ok(EvictionPolicy::Largest),
            other => Err(format!("unknown eviction policy: {}", other)),
        }
    }
}

/// Optional parameters of [`Cache::put`]
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub extension: Option<String>,
    /// Absent means the entry never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into());
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Evictable key/value store with a size budget
#[derive(Debug)]
pub struct Cache {
    core: StoreCore,
    max_bytes: u64,
}

impl Cache {
    /// Open (or create) a cache. An unreadable journal resets the cache.
    #[instrument(skip(options), fields(name = %options.name), level = "debug")]
    pub fn open(options: StoreOptions) -> Result<Self> {
        let (core, open_state) = StoreCore::open(&options)?;
        let cache = Self {
            core,
            max_bytes: options.max_bytes,
        };

        if open_state == OpenState::Discarded {
            let removed = {
                let state = cache.core.lock();
                let removed = cache.core.remove_unindexed_files(&state)?;
                cache.core.persist(&state.index);
                removed
            };
            log_cache_warn!(
                "Cache reset after journal loss",
                store = cache.core.name.as_str(),
                removed_files = removed
            );
        } else if options.reconcile_on_open {
            cache.reconcile(false)?;
        }
        Ok(cache)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn directory(&self) -> &Path {
        self.core.files.dir()
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Store `value` under `key`, overwriting any previous entry.
    ///
    /// Least recently used entries are evicted until the payload fits.
    /// A payload bigger than the whole budget is rejected up front.
    #[instrument(skip(self, value, options), level = "debug")]
    pub fn put(&self, key: &str, value: impl Into<Value>, options: PutOptions) -> Result<String> {
        validate_key(key)?;
        let extension = normalize_extension(options.extension.as_deref())?;
        let filename = filename_for(key, &extension)?;
        let value = value.into();
        let payload = value.encode()?;
        let incoming = payload.len() as u64;
        if incoming > self.max_bytes {
            return Err(StoreError::TooLarge {
                size: incoming,
                max: self.max_bytes,
            });
        }

        let mut state = self.core.lock();
        let evicted = self.make_room(&mut state, key, incoming);
        let previous = state.index.get(key).cloned();

        let size = match self.core.files.write(&filename, &payload) {
            Ok(size) => size,
            Err(e) => {
                log_cache_warn!("Write failed", store = self.core.name.as_str(), key = key);
                if evicted > 0 {
                    self.core.persist(&state.index);
                }
                return Err(e);
            }
        };

        if let Some(old) = &previous {
            if old.filename != filename {
                if let Err(e) = self.core.files.remove(&old.filename) {
                    log_cache_warn!(
                        "Failed to remove replaced file",
                        file = old.filename.as_str(),
                        error = tracing::field::display(&e)
                    );
                }
            }
        }

        let meta = EntryMeta {
            filename,
            extension,
            size_bytes: size,
            kind: value.kind(),
            access_count: previous.map_or(0, |old| old.access_count),
            expires_at: options.expires_at,
            last_used_at: self.core.now(),
        };
        state.index.insert_written(key, meta);
        self.core.persist(&state.index);
        Ok(key.to_string())
    }

    /// Evict LRU entries (never `key` itself) until `incoming` fits.
    fn make_room(&self, state: &mut StoreState, key: &str, incoming: u64) -> usize {
        let replaced = state.index.get(key).map_or(0, |m| m.size_bytes);
        let mut evicted = 0;
        loop {
            let current = state.index.statistics.size.saturating_sub(replaced);
            if current + incoming <= self.max_bytes {
                break;
            }
            let Some(victim) = state.index.lru_head(Some(key)) else {
                log_cache_warn!(
                    "Cache still over budget after eviction",
                    store = self.core.name.as_str(),
                    size = current + incoming,
                    max = self.max_bytes
                );
                break;
            };
            log_cache_debug!("Evicting", key = victim.as_str());
            self.core.remove_entry(state, &victim, Removal::Evict);
            evicted += 1;
        }
        evicted
    }

    /// Read a payload. Expired or orphaned entries are removed and miss.
    #[instrument(skip(self), level = "debug")]
    pub fn get(&self, key: &str) -> Result<Lookup<Value>> {
        validate_key(key)?;
        self.core.get(key, true)
    }

    /// Absolute path of a live entry's file.
    pub fn get_path(&self, key: &str) -> Result<Lookup<PathBuf>> {
        validate_key(key)?;
        Ok(self.core.get_path(key, true))
    }

    /// Remove an entry and its file. Returns false if the key was absent.
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.core.delete(key))
    }

    pub fn get_metadata(&self, key: &str) -> Option<EntryMeta> {
        self.core.metadata(key)
    }

    /// Journal membership only: neither TTL nor disk is consulted.
    pub fn contains(&self, key: &str) -> bool {
        self.core.contains(key)
    }

    /// Remove up to `n` entries in policy order. Returns the evicted keys.
    #[instrument(skip(self), level = "debug")]
    pub fn evict(&self, policy: EvictionPolicy, n: usize) -> Vec<String> {
        let mut state = self.core.lock();
        let victims = eviction_order(&state.index, policy, n);
        for key in &victims {
            self.core.remove_entry(&mut state, key, Removal::Evict);
        }
        if !victims.is_empty() {
            self.core.persist(&state.index);
            log_cache_info!(
                "Evicted entries",
                store = self.core.name.as_str(),
                count = victims.len()
            );
        }
        victims
    }

    /// Delete every entry whose expiry is at or before now.
    #[instrument(skip(self), level = "debug")]
    pub fn collect(&self) -> Vec<String> {
        let mut state = self.core.lock();
        let expired = self.collect_locked(&mut state);
        if !expired.is_empty() {
            self.core.persist(&state.index);
        }
        expired
    }

    fn collect_locked(&self, state: &mut StoreState) -> Vec<String> {
        let now = self.core.now();
        let expired: Vec<String> = state
            .index
            .entries
            .iter()
            .filter(|(_, meta)| meta.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.core.remove_entry(state, key, Removal::Expire);
        }
        expired
    }

    /// Remove all entries and data files. The journal stays.
    #[instrument(skip(self), level = "debug")]
    pub fn clear(&self) -> Result<usize> {
        let removed = self.core.clear()?;
        log_cache_info!("Cleared", store = self.core.name.as_str(), entries = removed);
        Ok(removed)
    }

    /// Sweep journal and disk. Orphan files are adopted when `restore` is
    /// set and deleted otherwise; expired entries are collected last.
    #[instrument(skip(self), level = "debug")]
    pub fn reconcile(&self, restore: bool) -> Result<ReconcileReport> {
        let policy = if restore {
            OrphanPolicy::Adopt
        } else {
            OrphanPolicy::Delete
        };
        let mut state = self.core.lock();
        let mut report = sweep(&self.core, &mut state, policy)?;
        report.expired = self.collect_locked(&mut state);
        self.core.persist(&state.index);
        Ok(report)
    }

    pub fn statistics(&self) -> Statistics {
        self.core.lock().index.statistics
    }

    pub fn keys(&self) -> Vec<String> {
        self.core.keys()
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the in-memory index
    pub fn snapshot(&self) -> Index {
        self.core.snapshot()
    }
}

/// First `n` keys in eviction order. Ties keep insertion order.
fn eviction_order(index: &Index, policy: EvictionPolicy, n: usize) -> Vec<String> {
    match policy {
        EvictionPolicy::Lru => index.lru.keys().take(n).cloned().collect(),
        EvictionPolicy::Lfu | EvictionPolicy::Largest => {
            let mut ranked: Vec<(&String, &EntryMeta)> = index.entries.iter().collect();
            if policy == EvictionPolicy::Lfu {
                ranked.sort_by_key(|(_, meta)| meta.access_count);
            } else {
                ranked.sort_by_key(|(_, meta)| std::cmp::Reverse(meta.size_bytes));
            }
            ranked.into_iter().take(n).map(|(k, _)| k.clone()).collect()
        }
    }
}
