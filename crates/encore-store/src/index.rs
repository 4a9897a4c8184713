//! In-memory index of a store: entries, LRU order and counters.
//!
//! `entries` keeps insertion order, which breaks ties for the LFU and
//! largest-first eviction orders. `lru` is a separate ordered map whose head
//! is the least recently used key; its timestamps are diagnostic only.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entry::{EntryMeta, Statistics};

/// Why an entry left the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Delete,
    Evict,
    Expire,
    Orphan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub entries: IndexMap<String, EntryMeta>,
    pub lru: IndexMap<String, DateTime<Utc>>,
    pub statistics: Statistics,
}

impl Index {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&EntryMeta> {
        self.entries.get(key)
    }

    /// Record a freshly written entry, replacing any previous record.
    pub(crate) fn insert_written(&mut self, key: &str, meta: EntryMeta) {
        self.detach(key);
        self.statistics.size += meta.size_bytes;
        self.statistics.saves += 1;
        self.lru.insert(key.to_string(), meta.last_used_at);
        self.entries.insert(key.to_string(), meta);
    }

    /// Record an entry discovered on disk. Does not count as a save.
    pub(crate) fn insert_adopted(&mut self, key: &str, meta: EntryMeta) {
        self.detach(key);
        self.statistics.size += meta.size_bytes;
        self.lru.insert(key.to_string(), meta.last_used_at);
        self.entries.insert(key.to_string(), meta);
    }

    /// Remove an entry and account for the removal.
    pub(crate) fn remove(&mut self, key: &str, why: Removal) -> Option<EntryMeta> {
        let meta = self.detach(key)?;
        self.statistics.deletions += 1;
        if why == Removal::Evict {
            self.statistics.evictions += 1;
        }
        Some(meta)
    }

    /// Take an entry out for rewriting. Not counted as a removal.
    pub(crate) fn take(&mut self, key: &str) -> Option<EntryMeta> {
        self.detach(key)
    }

    /// Drop an entry without touching the removal counters.
    fn detach(&mut self, key: &str) -> Option<EntryMeta> {
        self.lru.shift_remove(key);
        let meta = self.entries.shift_remove(key)?;
        self.statistics.size = self.statistics.size.saturating_sub(meta.size_bytes);
        Some(meta)
    }

    /// Mark a successful read: LRU tail, access count, hit counter.
    pub(crate) fn touch(&mut self, key: &str, now: DateTime<Utc>) {
        if let Some(meta) = self.entries.get_mut(key) {
            meta.access_count += 1;
            meta.last_used_at = now;
            self.lru.shift_remove(key);
            self.lru.insert(key.to_string(), now);
            self.statistics.hits += 1;
        }
    }

    /// Replace a record's size, keeping the aggregate in step.
    pub(crate) fn set_size(&mut self, key: &str, size: u64) {
        if let Some(meta) = self.entries.get_mut(key) {
            self.statistics.size = self.statistics.size.saturating_sub(meta.size_bytes) + size;
            meta.size_bytes = size;
        }
    }

    /// Least recently used key, skipping `except`
    pub(crate) fn lru_head(&self, except: Option<&str>) -> Option<String> {
        self.lru
            .keys()
            .find(|k| Some(k.as_str()) != except)
            .cloned()
    }

    /// Make `lru` a permutation of `entries` and recompute the size total.
    ///
    /// Returns true when anything had to change.
    pub(crate) fn repair(&mut self) -> bool {
        let before_len = self.lru.len();
        let entries = &self.entries;
        self.lru.retain(|k, _| entries.contains_key(k));
        let mut changed = self.lru.len() != before_len;

        for (key, meta) in &self.entries {
            if !self.lru.contains_key(key) {
                self.lru.insert(key.clone(), meta.last_used_at);
                changed = true;
            }
        }

        let total: u64 = self.entries.values().map(|m| m.size_bytes).sum();
        if total != self.statistics.size {
            self.statistics.size = total;
            changed = true;
        }
        changed
    }

    /// Check the at-rest invariants.
    pub fn is_consistent(&self) -> bool {
        let total: u64 = self.entries.values().map(|m| m.size_bytes).sum();
        total == self.statistics.size
            && self.lru.len() == self.entries.len()
            && self.lru.keys().all(|k| self.entries.contains_key(k))
    }
}
