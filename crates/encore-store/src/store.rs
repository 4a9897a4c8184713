//! Shared core of the cache and the datastore.
//!
//! Both stores are a directory of payload files plus a journal, guarded by
//! one lock. The lock covers every read-modify-write of the index together
//! with the journal save that follows it.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use encore_config::{log_journal_warn, log_store_warn};
use parking_lot::{Mutex, MutexGuard};

use crate::clock::{Clock, SystemClock};
use crate::entry::{EntryMeta, Lookup, PayloadKind, Value};
use crate::error::{Result, StoreError};
use crate::files::EntryFiles;
use crate::index::{Index, Removal};
use crate::journal::{Journal, JournalLoad};

/// How a store is opened
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Human label, used in log fields
    pub name: String,
    /// Directory owning every data file and the journal
    pub directory: PathBuf,
    /// Soft bound on the aggregate payload size (cache only)
    pub max_bytes: u64,
    /// Run an integrity sweep right after loading the journal
    pub reconcile_on_open: bool,
    pub clock: Arc<dyn Clock>,
}

impl StoreOptions {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            max_bytes: encore_config::DEFAULT_CACHE_MAX_BYTES,
            reconcile_on_open: false,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn reconcile_on_open(mut self, enabled: bool) -> Self {
        self.reconcile_on_open = enabled;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Outcome of loading the journal at open
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OpenState {
    /// No journal was present; a fresh one was written
    Fresh,
    Loaded,
    /// The journal was unreadable or from another schema and was discarded
    Discarded,
}

/// Mutable state behind the store lock
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub index: Index,
    /// Keys held by open streaming writes, with their target filenames
    pub reserved: HashMap<String, String>,
}

#[derive(Debug)]
pub(crate) struct StoreCore {
    pub name: String,
    pub files: EntryFiles,
    pub journal: Journal,
    pub clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
}

impl StoreCore {
    /// Create the directory if needed and load the journal.
    pub fn open(options: &StoreOptions) -> Result<(Self, OpenState)> {
        fs::create_dir_all(&options.directory)?;
        let journal = Journal::new(&options.directory);

        let (index, open_state) = match journal.load() {
            Ok(JournalLoad::Loaded(index)) => (index, OpenState::Loaded),
            Ok(JournalLoad::Missing) => (Index::default(), OpenState::Fresh),
            Ok(JournalLoad::Corrupt(reason)) => {
                log_journal_warn!(
                    "Journal is corrupt, discarding it",
                    store = options.name.as_str(),
                    reason = reason.as_str()
                );
                journal.remove()?;
                (Index::default(), OpenState::Discarded)
            }
            Ok(JournalLoad::VersionMismatch { found }) => {
                log_journal_warn!(
                    "Journal schema version mismatch, starting empty",
                    store = options.name.as_str(),
                    found = found
                );
                journal.remove()?;
                (Index::default(), OpenState::Discarded)
            }
            Err(e) => return Err(e.into()),
        };

        let core = Self {
            name: options.name.clone(),
            files: EntryFiles::new(&options.directory),
            journal,
            clock: Arc::clone(&options.clock),
            state: Mutex::new(StoreState {
                index,
                reserved: HashMap::new(),
            }),
        };
        if open_state == OpenState::Fresh {
            core.persist(&core.lock().index);
        }
        Ok((core, open_state))
    }

    pub fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Save the journal. Failures are logged; the in-memory state stands.
    pub fn persist(&self, index: &Index) {
        if let Err(e) = self.journal.save(index) {
            log_journal_warn!(
                "Failed to save journal",
                store = self.name.as_str(),
                error = display(&e)
            );
        }
    }

    /// Drop an entry and its file.
    pub fn remove_entry(&self, state: &mut StoreState, key: &str, why: Removal) -> Option<EntryMeta> {
        let meta = state.index.remove(key, why)?;
        if let Err(e) = self.files.remove(&meta.filename) {
            log_store_warn!(
                "Failed to remove entry file",
                store = self.name.as_str(),
                file = meta.filename.as_str(),
                error = display(&e)
            );
        }
        Some(meta)
    }

    /// Checks shared by every read path: absent key, missing file and,
    /// when `honor_ttl`, expiry. Misses are counted here.
    fn resolve(&self, state: &mut StoreState, key: &str, honor_ttl: bool) -> Option<EntryMeta> {
        let Some(meta) = state.index.get(key).cloned() else {
            state.index.statistics.misses += 1;
            return None;
        };

        if !self.files.exists(&meta.filename) {
            log_store_warn!(
                "Entry file is missing, dropping orphaned entry",
                store = self.name.as_str(),
                key = key,
                file = meta.filename.as_str()
            );
            state.index.remove(key, Removal::Orphan);
            state.index.statistics.misses += 1;
            self.persist(&state.index);
            return None;
        }

        if honor_ttl && meta.is_expired(self.now()) {
            self.remove_entry(state, key, Removal::Expire);
            state.index.statistics.misses += 1;
            self.persist(&state.index);
            return None;
        }

        Some(meta)
    }

    /// Read and decode a payload, counting a hit on success.
    pub fn get(&self, key: &str, honor_ttl: bool) -> Result<Lookup<Value>> {
        let mut state = self.lock();
        let Some(meta) = self.resolve(&mut state, key, honor_ttl) else {
            return Ok(Lookup::Miss);
        };

        let bytes = match self.files.read(&meta.filename) {
            Ok(bytes) => bytes,
            Err(source) => {
                // Transient: the entry stays.
                state.index.statistics.misses += 1;
                return Err(StoreError::ReadFailure {
                    path: self.files.path_of(&meta.filename),
                    source,
                });
            }
        };
        let value = decode(key, meta.kind, bytes)?;

        state.index.touch(key, self.now());
        self.persist(&state.index);
        Ok(Lookup::Hit(value))
    }

    /// Same checks as [`get`](Self::get) without reading the payload.
    pub fn get_path(&self, key: &str, honor_ttl: bool) -> Lookup<PathBuf> {
        let mut state = self.lock();
        let Some(meta) = self.resolve(&mut state, key, honor_ttl) else {
            return Lookup::Miss;
        };
        state.index.touch(key, self.now());
        self.persist(&state.index);
        Lookup::Hit(self.files.path_of(&meta.filename))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.delete_locked(&mut self.lock(), key)
    }

    /// [`delete`](Self::delete) under a guard the caller already holds.
    pub fn delete_locked(&self, state: &mut StoreState, key: &str) -> bool {
        if self.remove_entry(state, key, Removal::Delete).is_none() {
            return false;
        }
        self.persist(&state.index);
        true
    }

    /// Remove every entry and every data file, except files held by
    /// streaming writes. Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize> {
        let mut state = self.lock();
        let keys: Vec<String> = state.index.entries.keys().cloned().collect();
        for key in &keys {
            self.remove_entry(&mut state, key, Removal::Delete);
        }
        let swept = self.remove_unindexed_files(&state);
        state.index.repair();
        self.persist(&state.index);
        swept?;
        Ok(keys.len())
    }

    /// Delete data files the index does not know about.
    pub fn remove_unindexed_files(&self, state: &StoreState) -> Result<usize> {
        let mut removed = 0;
        for file in self.files.scan()? {
            let indexed = state.index.entries.values().any(|m| m.filename == file.name);
            let reserved = state.reserved.values().any(|f| *f == file.name);
            if !indexed && !reserved && self.files.remove(&file.name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().index.contains(key)
    }

    pub fn metadata(&self, key: &str) -> Option<EntryMeta> {
        self.lock().index.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().index.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn snapshot(&self) -> Index {
        self.lock().index.clone()
    }
}

/// Turn raw file bytes back into a value of the recorded kind.
pub(crate) fn decode(key: &str, kind: PayloadKind, bytes: Vec<u8>) -> Result<Value> {
    match kind {
        PayloadKind::Binary => Ok(Value::Bytes(bytes)),
        PayloadKind::Text => String::from_utf8(bytes)
            .map(Value::Text)
            .map_err(|_| StoreError::Decode {
                key: key.to_string(),
                expected: "UTF-8 text",
            }),
        PayloadKind::Dict => serde_json::from_slice(&bytes)
            .map(Value::Dict)
            .map_err(|_| StoreError::Decode {
                key: key.to_string(),
                expected: "a JSON object",
            }),
    }
}
