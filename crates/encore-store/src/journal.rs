//! On-disk journal: the single JSON index file owned by a store.
//!
//! ## Layout
//!
//! ```text
//! <directory>/
//! ├── 8d1f6b0c2e9a4f37b5c0d4e1a2f3b6c7-metadata.json   # journal
//! ├── <key><.ext>                                      # one file per entry
//! └── ...
//! ```
//!
//! The journal name carries a 32-hex prefix and a dot, and the stem is
//! rejected by key validation, so no legal key can shadow it.
//!
//! ## Schema (version 2)
//!
//! ```json
//! {
//!   "version": 2,
//!   "entries":    { "<key>": { "filename": "...", "size_bytes": 3, ... } },
//!   "lru":        { "<key>": "<rfc3339>" },
//!   "statistics": { "hits": 0, "misses": 0, "saves": 0, "evictions": 0, "deletions": 0, "size": 0 }
//! }
//! ```
//!
//! Object order in `lru` is the LRU order, head first.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use encore_config::log_journal_debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::Index;

/// Current journal schema version
pub const JOURNAL_VERSION: u32 = 2;

/// Journal filename without its `.json` suffix
pub const JOURNAL_STEM: &str = "8d1f6b0c2e9a4f37b5c0d4e1a2f3b6c7-metadata";

/// Journal filename inside a store directory
pub const JOURNAL_FILENAME: &str = "8d1f6b0c2e9a4f37b5c0d4e1a2f3b6c7-metadata.json";

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode journal: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to persist journal: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// What was found on disk at load time
#[derive(Debug)]
pub enum JournalLoad {
    /// No journal file yet
    Missing,
    Loaded(Index),
    /// File exists but is not a readable journal
    Corrupt(String),
    /// Readable, but written by a different schema version
    VersionMismatch { found: u64 },
}

#[derive(Serialize)]
struct JournalDocRef<'a> {
    version: u32,
    #[serde(flatten)]
    index: &'a Index,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u64>,
}

#[derive(Deserialize)]
struct JournalDoc {
    #[allow(dead_code)]
    version: u32,
    #[serde(flatten)]
    index: Index,
}

/// Handle on a store's journal file
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
    path: PathBuf,
}

impl Journal {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(JOURNAL_FILENAME);
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the journal. I/O errors other than "not found" are returned.
    pub fn load(&self) -> Result<JournalLoad, JournalError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(JournalLoad::Missing),
            Err(e) => return Err(e.into()),
        };

        let probe: VersionProbe = match serde_json::from_slice(&bytes) {
            Ok(probe) => probe,
            Err(e) => return Ok(JournalLoad::Corrupt(e.to_string())),
        };

        let Some(version) = probe.version else {
            return Ok(JournalLoad::Corrupt("missing version field".to_string()));
        };
        if version != u64::from(JOURNAL_VERSION) {
            return Ok(JournalLoad::VersionMismatch { found: version });
        }

        // Parsed straight from bytes so object order (the LRU order) survives.
        match serde_json::from_slice::<JournalDoc>(&bytes) {
            Ok(doc) => Ok(JournalLoad::Loaded(doc.index)),
            Err(e) => Ok(JournalLoad::Corrupt(e.to_string())),
        }
    }

    /// Write the journal atomically (temp file + rename).
    pub fn save(&self, index: &Index) -> Result<(), JournalError> {
        let tmp = tempfile::Builder::new()
            .prefix(".journal")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(
                &mut writer,
                &JournalDocRef {
                    version: JOURNAL_VERSION,
                    index,
                },
            )?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        log_journal_debug!("Journal written", entries = index.len());
        Ok(())
    }

    /// Delete the journal file if present.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
