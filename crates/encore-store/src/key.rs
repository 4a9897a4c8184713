//! Key validation and disk filename policy.
//!
//! A filename is always `key` followed by an optional normalized extension
//! (`""` or `".ext"`). Keys never contain a dot, so the first dot of a
//! filename separates the key from its extension.

use crate::error::{Result, StoreError};
use crate::journal::JOURNAL_STEM;

/// Longest filename most filesystems accept, in bytes
pub const MAX_FILENAME_LEN: usize = 255;

const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

fn has_forbidden_char(s: &str) -> bool {
    s.chars()
        .any(|c| c.is_whitespace() || c.is_control() || RESERVED_CHARS.contains(&c))
}

/// Check a caller-supplied key against the filename policy.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::invalid_key(key, "key is empty"));
    }
    if key.len() > MAX_FILENAME_LEN {
        return Err(StoreError::invalid_key(key, "key is too long"));
    }
    if key.contains('.') {
        return Err(StoreError::invalid_key(
            key,
            "key must not carry a file extension",
        ));
    }
    if has_forbidden_char(key) {
        return Err(StoreError::invalid_key(
            key,
            "key contains a path separator, whitespace or reserved character",
        ));
    }
    if key == JOURNAL_STEM {
        return Err(StoreError::invalid_key(key, "key is reserved for the journal"));
    }
    Ok(())
}

/// Normalize an optional extension to `""` or `"." + ext`.
///
/// Any number of leading dots collapse to exactly one.
pub fn normalize_extension(ext: Option<&str>) -> Result<String> {
    let Some(raw) = ext else {
        return Ok(String::new());
    };
    let trimmed = raw.trim_start_matches('.');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if has_forbidden_char(trimmed) {
        return Err(StoreError::invalid_key(raw, "extension contains a reserved character"));
    }
    Ok(format!(".{}", trimmed))
}

/// Build the disk filename for a key and an already-normalized extension.
pub fn filename_for(key: &str, extension: &str) -> Result<String> {
    validate_key(key)?;
    let filename = format!("{}{}", key, extension);
    if filename.len() > MAX_FILENAME_LEN {
        return Err(StoreError::invalid_key(key, "file name is too long"));
    }
    Ok(filename)
}

/// Split a filename into its key stem and extension (with leading dot).
pub fn split_filename(name: &str) -> (&str, &str) {
    match name.find('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}
