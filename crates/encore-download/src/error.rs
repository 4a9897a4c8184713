use std::io;

use thiserror::Error;

/// Errors that can occur while downloading
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Could not determine the size of {url}")]
    UnknownSize { url: String },

    #[error("Range {start}-{end} failed after {completed} contiguous bytes: {reason}")]
    ChunkFailed {
        start: u64,
        end: u64,
        completed: u64,
        reason: String,
    },

    #[error("Body ended early: expected {expected} bytes, received {received}")]
    ShortBody { expected: u64, received: u64 },

    #[error("{url} stalled for more than {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("Server ignored the requested range starting at {start}")]
    RangeIgnored { start: u64 },

    #[error("Sink error: {0}")]
    Sink(#[from] io::Error),

    #[error("Store error: {0}")]
    Store(#[from] encore_store::StoreError),
}

impl DownloadError {
    /// Network-side failures a single-stream retry may recover from.
    /// Local disk errors are not retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DownloadError::Sink(_) | DownloadError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
