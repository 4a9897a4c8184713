//! # encore-download
//!
//! Fetches remote audio into Encore datastores.
//!
//! The [`Downloader`] writes through a [`DownloadSink`], which is
//! implemented for plain files and for the datastore's streaming
//! [`WriteHandle`](encore_store::WriteHandle). Finalizing the entry with
//! `close_write_file` stays with the caller.

pub mod downloader;
pub mod error;
pub mod range;
pub mod sink;

pub use downloader::{Downloader, Progress};
pub use error::{DownloadError, Result};
pub use range::{partition, ByteRange};
pub use sink::DownloadSink;
