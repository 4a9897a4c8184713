//! Long-lived store for user-owned payloads, with streaming writes.
//!
//! Entries never expire and are never evicted. Large payloads are written
//! through a [`WriteHandle`]: the key is reserved at open, the caller owns
//! the file until close, and accounting happens only at close. The store
//! lock is taken for the reservation and for the finalization, never in
//! between.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use encore_config::{log_datastore_debug, log_datastore_info, log_datastore_warn};
use tracing::instrument;

use crate::entry::{EntryMeta, Lookup, PayloadKind, Statistics, Value};
use crate::error::{Result, StoreError};
use crate::index::Index;
use crate::key::{filename_for, normalize_extension, validate_key};
use crate::reconcile::{sweep, OrphanPolicy, ReconcileReport};
use crate::store::{OpenState, StoreCore, StoreOptions};

/// Exclusive handle on a reserved datastore file
#[derive(Debug)]
pub struct WriteHandle {
    key: String,
    filename: String,
    extension: String,
    kind: PayloadKind,
    path: PathBuf,
    file: File,
}

impl WriteHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// The underlying file, for positional writes
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Current length of the file on disk
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn set_len(&self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }
}

impl Write for WriteHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for WriteHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Non-evictable key/value store
#[derive(Debug)]
pub struct Datastore {
    core: StoreCore,
}

impl Datastore {
    /// Open (or create) a datastore. An unreadable journal triggers a
    /// restore sweep so every file on disk comes back as an entry.
    #[instrument(skip(options), fields(name = %options.name), level = "debug")]
    pub fn open(options: StoreOptions) -> Result<Self> {
        let (core, open_state) = StoreCore::open(&options)?;
        let store = Self { core };

        if open_state == OpenState::Discarded {
            let report = store.reconcile(true)?;
            log_datastore_warn!(
                "Datastore restored after journal loss",
                store = store.core.name.as_str(),
                adopted = report.adopted.len()
            );
        } else if options.reconcile_on_open {
            store.reconcile(false)?;
        }
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn directory(&self) -> &Path {
        self.core.files.dir()
    }

    /// One-shot write. Fails with `KeyExists` instead of overwriting.
    #[instrument(skip(self, value), level = "debug")]
    pub fn write_file(
        &self,
        key: &str,
        value: impl Into<Value>,
        extension: Option<&str>,
    ) -> Result<String> {
        let extension = normalize_extension(extension)?;
        let filename = filename_for(key, &extension)?;
        let value = value.into();
        let payload = value.encode()?;

        let mut state = self.core.lock();
        if state.reserved.contains_key(key) {
            return Err(StoreError::Reserved {
                key: key.to_string(),
            });
        }
        if state.index.contains(key) {
            return Err(StoreError::KeyExists {
                key: key.to_string(),
            });
        }

        let size = self.core.files.write(&filename, &payload)?;
        state.index.insert_written(
            key,
            EntryMeta {
                filename,
                extension,
                size_bytes: size,
                kind: value.kind(),
                access_count: 0,
                expires_at: None,
                last_used_at: self.core.now(),
            },
        );
        self.core.persist(&state.index);
        Ok(key.to_string())
    }

    /// Reserve `key` and open its file for a streaming write.
    ///
    /// With `allow_append` an existing file is continued from its end (an
    /// existing entry is taken back into the reserved state); otherwise the
    /// key must be free and the file starts empty.
    #[instrument(skip(self), level = "debug")]
    pub fn open_write_file(
        &self,
        key: &str,
        kind: PayloadKind,
        extension: Option<&str>,
        allow_append: bool,
    ) -> Result<WriteHandle> {
        let extension = normalize_extension(extension)?;
        let filename = filename_for(key, &extension)?;

        let appending = {
            let mut state = self.core.lock();
            if state.reserved.contains_key(key) {
                return Err(StoreError::Reserved {
                    key: key.to_string(),
                });
            }
            let exists = state.index.get(key).is_some();
            if exists && !allow_append {
                return Err(StoreError::KeyExists {
                    key: key.to_string(),
                });
            }
            state.reserved.insert(key.to_string(), filename.clone());
            exists
        };

        let path = self.core.files.path_of(&filename);
        let opened = self
            .core
            .files
            .open_stream(&filename, allow_append)
            .and_then(|mut file| {
                if allow_append {
                    file.seek(SeekFrom::End(0))?;
                }
                Ok(file)
            });
        let file = match opened {
            Ok(file) => file,
            Err(source) => {
                // The existing entry, if any, was never touched.
                self.core.lock().reserved.remove(key);
                return Err(StoreError::WriteFailure { path, source });
            }
        };

        if appending {
            let mut state = self.core.lock();
            if let Some(existing) = state.index.take(key) {
                if existing.filename != filename {
                    if let Err(e) = self.core.files.remove(&existing.filename) {
                        log_datastore_warn!(
                            "Could not remove the previous file",
                            key = key,
                            file = existing.filename.as_str(),
                            error = tracing::field::display(&e)
                        );
                    }
                }
                self.core.persist(&state.index);
            }
        }

        log_datastore_debug!("Reserved for streaming write", key = key);
        Ok(WriteHandle {
            key: key.to_string(),
            filename,
            extension,
            kind,
            path,
            file,
        })
    }

    /// Finalize a streaming write and return the size recorded.
    #[instrument(skip(self, handle), fields(key = %handle.key), level = "debug")]
    pub fn close_write_file(&self, handle: WriteHandle) -> Result<u64> {
        let WriteHandle {
            key,
            filename,
            extension,
            kind,
            path,
            mut file,
        } = handle;

        let synced = file.flush().and_then(|()| file.sync_all());
        drop(file);

        let mut state = self.core.lock();
        if state.reserved.get(&key) != Some(&filename) {
            return Err(StoreError::NotReserved { key });
        }
        state.reserved.remove(&key);
        if let Err(source) = synced {
            return Err(StoreError::WriteFailure { path, source });
        }

        let size = self
            .core
            .files
            .size_on_disk(&filename)
            .map_err(|source| StoreError::WriteFailure { path, source })?;
        state.index.insert_written(
            &key,
            EntryMeta {
                filename,
                extension,
                size_bytes: size,
                kind,
                access_count: 0,
                expires_at: None,
                last_used_at: self.core.now(),
            },
        );
        self.core.persist(&state.index);
        log_datastore_info!("Streaming write finalized", key = key.as_str(), size = size);
        Ok(size)
    }

    /// Abandon a streaming write: release the key and remove the file.
    #[instrument(skip(self, handle), fields(key = %handle.key), level = "debug")]
    pub fn discard_write_file(&self, handle: WriteHandle) -> Result<()> {
        let WriteHandle {
            key, filename, file, ..
        } = handle;
        drop(file);

        let mut state = self.core.lock();
        if state.reserved.get(&key) != Some(&filename) {
            return Err(StoreError::NotReserved { key });
        }
        state.reserved.remove(&key);
        self.core.files.remove(&filename)?;
        Ok(())
    }

    /// Read a payload in its recorded mode.
    #[instrument(skip(self), level = "debug")]
    pub fn get_file(&self, key: &str) -> Result<Lookup<Value>> {
        validate_key(key)?;
        self.core.get(key, false)
    }

    pub fn get_file_path(&self, key: &str) -> Result<Lookup<PathBuf>> {
        validate_key(key)?;
        Ok(self.core.get_path(key, false))
    }

    pub fn contains_file(&self, key: &str) -> bool {
        self.core.contains(key)
    }

    pub fn get_metadata(&self, key: &str) -> Option<EntryMeta> {
        self.core.metadata(key)
    }

    /// Remove an entry and its file. A reserved key cannot be deleted.
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut state = self.core.lock();
        if state.reserved.contains_key(key) {
            return Err(StoreError::Reserved {
                key: key.to_string(),
            });
        }
        Ok(self.core.delete_locked(&mut state, key))
    }

    /// Remove all entries and data files, leaving open streaming writes.
    #[instrument(skip(self), level = "debug")]
    pub fn clear(&self) -> Result<usize> {
        let removed = self.core.clear()?;
        log_datastore_info!("Cleared", store = self.core.name.as_str(), entries = removed);
        Ok(removed)
    }

    /// Sweep journal and disk. Orphan files are adopted when `restore` is
    /// set and otherwise left in place.
    #[instrument(skip(self), level = "debug")]
    pub fn reconcile(&self, restore: bool) -> Result<ReconcileReport> {
        let policy = if restore {
            OrphanPolicy::Adopt
        } else {
            OrphanPolicy::Keep
        };
        let mut state = self.core.lock();
        let report = sweep(&self.core, &mut state, policy)?;
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

    /// Keys currently held by open streaming writes
    pub fn reserved_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.core.lock().reserved.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> Index {
        self.core.snapshot()
    }
}
