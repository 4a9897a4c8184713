//! Entry store: raw payload files under disk-safe names.
//!
//! Writes go through a hidden temporary in the store directory and are
//! renamed into place, so a reader never observes a half-written payload.
//! Temporaries start with a dot; keys never do.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use encore_config::log_store_warn;
use tracing::instrument;
use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::journal::JOURNAL_FILENAME;

/// Prefix shared by every temporary created in a store directory
pub const TEMP_PREFIX: &str = ".";

/// Temporaries older than this are assumed abandoned by a crashed writer
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(3600);

/// A data file found in a store directory
#[derive(Debug, Clone, PartialEq)]
pub struct DiskFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// File I/O for one store directory
#[derive(Debug, Clone)]
pub struct EntryFiles {
    dir: PathBuf,
}

impl EntryFiles {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.path_of(filename).is_file()
    }

    /// Replace `filename` with `bytes` atomically and return the size on disk.
    #[instrument(skip(self, bytes), fields(len = bytes.len()), level = "debug")]
    pub fn write(&self, filename: &str, bytes: &[u8]) -> Result<u64> {
        let path = self.path_of(filename);
        let failed = |source: io::Error| StoreError::WriteFailure {
            path: path.clone(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(failed)?;
        tmp.write_all(bytes).map_err(failed)?;
        tmp.as_file().sync_all().map_err(failed)?;

        if path.exists() {
            log_store_warn!("Overwriting existing entry file", file = filename);
        }
        tmp.persist(&path).map_err(|e| failed(e.error))?;

        self.size_on_disk(filename).map_err(failed)
    }

    /// Read a whole payload. A missing file surfaces as `NotFound`.
    pub fn read(&self, filename: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_of(filename))
    }

    /// Remove a payload file. Returns false if it was already gone.
    pub fn remove(&self, filename: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_of(filename)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn size_on_disk(&self, filename: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.path_of(filename))?.len())
    }

    /// Create (or reopen) a file for a streaming write.
    pub(crate) fn open_stream(&self, filename: &str, append: bool) -> io::Result<File> {
        let path = self.path_of(filename);
        if append {
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
        } else {
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
        }
    }

    /// List data files: regular files other than the journal and temporaries.
    pub fn scan(&self) -> io::Result<Vec<DiskFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                log_store_warn!(
                    "Skipping non-UTF-8 file name",
                    file = display(entry.path().display())
                );
                continue;
            };
            if name == JOURNAL_FILENAME || is_temporary(name) {
                continue;
            }
            let meta = entry.metadata().map_err(io::Error::from)?;
            files.push(DiskFile {
                name: name.to_string(),
                size: meta.len(),
                modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Delete temporaries older than `max_age`. Returns how many went.
    pub fn sweep_stale_temporaries(&self, max_age: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_temporary(name) || !entry.file_type()?.is_file() {
                continue;
            }

            let age = entry
                .metadata()?
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age > max_age && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Whether a directory entry name is a store temporary
pub fn is_temporary(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}
