//! Positional write targets for downloads.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

use encore_store::WriteHandle;

/// Something a download can write into at arbitrary offsets.
pub trait DownloadSink: Send {
    /// Write all of `buf` starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Truncate or extend to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Current size in bytes
    fn size(&mut self) -> io::Result<u64>;

    fn flush_all(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DownloadSink for File {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn flush_all(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl DownloadSink for WriteHandle {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn size(&mut self) -> io::Result<u64> {
        self.len()
    }

    fn flush_all(&mut self) -> io::Result<()> {
        self.flush()
    }
}
