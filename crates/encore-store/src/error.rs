use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during cache and datastore operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Key already exists: {key}")]
    KeyExists { key: String },

    #[error("Key is reserved by an open streaming write: {key}")]
    Reserved { key: String },

    #[error("Key has no open streaming write: {key}")]
    NotReserved { key: String },

    #[error("Payload of {size} bytes exceeds the store limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Stored payload for {key} is not valid {expected}")]
    Decode { key: String, expected: &'static str },

    #[error("Journal error: {0}")]
    Journal(#[from] crate::journal::JournalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn invalid_key(key: &str, reason: &'static str) -> Self {
        StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
