//! Integrity reconciler: the two-phase sweep between journal and disk.
//!
//! Phase A walks the directory and brings the index in line with what is
//! on disk (sizes, extensions, orphan files). Phase B walks the index and
//! drops entries whose file is gone. The caller saves the journal once.

use std::collections::HashSet;

use encore_config::{log_store_info, log_store_warn};
use serde::Serialize;

use crate::entry::{EntryMeta, PayloadKind};
use crate::error::Result;
use crate::files::{DiskFile, STALE_TEMP_AGE};
use crate::index::Removal;
use crate::key::{split_filename, validate_key};
use crate::store::{StoreCore, StoreState};

/// What to do with a data file the journal does not know about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Record it as a binary entry sized from disk
    Adopt,
    /// Remove it from disk
    Delete,
    /// Leave it alone and log it
    Keep,
}

/// Summary of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Orphan files recorded as new entries
    pub adopted: Vec<String>,
    /// Orphan files removed from disk
    pub deleted_files: Vec<String>,
    /// Orphan files left in place
    pub kept_files: Vec<String>,
    /// Entries dropped because their file is missing
    pub dropped_entries: Vec<String>,
    /// Entries whose recorded size was corrected
    pub resized: Vec<String>,
    /// Entries whose recorded extension was corrected
    pub renamed: Vec<String>,
    /// Expired cache entries collected at the end of the sweep
    pub expired: Vec<String>,
    /// Abandoned temporaries removed
    pub stale_temporaries: usize,
    /// LRU order or size total had to be rebuilt
    pub repaired: bool,
}

impl ReconcileReport {
    /// True when the sweep changed nothing in the index.
    pub fn is_clean(&self) -> bool {
        self.adopted.is_empty()
            && self.deleted_files.is_empty()
            && self.dropped_entries.is_empty()
            && self.resized.is_empty()
            && self.renamed.is_empty()
            && self.expired.is_empty()
            && !self.repaired
    }
}

/// Run both phases against a locked store.
pub(crate) fn sweep(
    core: &StoreCore,
    state: &mut StoreState,
    policy: OrphanPolicy,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    match core.files.sweep_stale_temporaries(STALE_TEMP_AGE) {
        Ok(n) => report.stale_temporaries = n,
        Err(e) => log_store_warn!(
            "Failed to sweep stale temporaries",
            store = core.name.as_str(),
            error = display(&e)
        ),
    }

    let reserved: HashSet<&str> = state.reserved.values().map(String::as_str).collect();
    let disk: Vec<DiskFile> = core
        .files
        .scan()?
        .into_iter()
        .filter(|f| !reserved.contains(f.name.as_str()))
        .collect();
    let on_disk: HashSet<String> = disk.iter().map(|f| f.name.clone()).collect();
    drop(reserved);

    // Phase A, exact filename matches first so a stray duplicate can never
    // steal a record from the file it actually names.
    let mut matched: HashSet<String> = HashSet::new();
    let mut unmatched: Vec<&DiskFile> = Vec::new();
    for file in &disk {
        let (stem, _) = split_filename(&file.name);
        let recorded = state
            .index
            .get(stem)
            .map(|meta| (meta.filename == file.name, meta.size_bytes));
        match recorded {
            Some((true, size)) => {
                if size != file.size {
                    log_store_warn!(
                        "Entry size differs from disk, updating record",
                        store = core.name.as_str(),
                        key = stem,
                        recorded = size,
                        actual = file.size
                    );
                    state.index.set_size(stem, file.size);
                    report.resized.push(stem.to_string());
                }
                matched.insert(stem.to_string());
            }
            _ => unmatched.push(file),
        }
    }

    for file in unmatched {
        let (stem, ext) = split_filename(&file.name);

        let stale_record = state
            .index
            .get(stem)
            .is_some_and(|meta| !on_disk.contains(&meta.filename));
        if stale_record && !matched.contains(stem) {
            log_store_warn!(
                "Entry extension differs from disk, updating record",
                store = core.name.as_str(),
                key = stem,
                file = file.name.as_str()
            );
            if let Some(meta) = state.index.entries.get_mut(stem) {
                meta.filename = file.name.clone();
                meta.extension = ext.to_string();
            }
            state.index.set_size(stem, file.size);
            report.renamed.push(stem.to_string());
            matched.insert(stem.to_string());
            continue;
        }

        let adoptable = validate_key(stem).is_ok() && !state.index.contains(stem);
        match policy {
            OrphanPolicy::Adopt if adoptable => {
                log_store_info!(
                    "Adopting orphan file",
                    store = core.name.as_str(),
                    file = file.name.as_str(),
                    size = file.size
                );
                state.index.insert_adopted(
                    stem,
                    EntryMeta {
                        filename: file.name.clone(),
                        extension: ext.to_string(),
                        size_bytes: file.size,
                        kind: PayloadKind::Binary,
                        access_count: 0,
                        expires_at: None,
                        last_used_at: file.modified,
                    },
                );
                report.adopted.push(stem.to_string());
                matched.insert(stem.to_string());
            }
            OrphanPolicy::Delete => match core.files.remove(&file.name) {
                Ok(_) => {
                    log_store_warn!(
                        "Deleted orphan file",
                        store = core.name.as_str(),
                        file = file.name.as_str()
                    );
                    report.deleted_files.push(file.name.clone());
                }
                Err(e) => log_store_warn!(
                    "Failed to delete orphan file",
                    store = core.name.as_str(),
                    file = file.name.as_str(),
                    error = display(&e)
                ),
            },
            _ => {
                log_store_warn!(
                    "Orphan file left in place",
                    store = core.name.as_str(),
                    file = file.name.as_str()
                );
                report.kept_files.push(file.name.clone());
            }
        }
    }

    // Phase B
    let missing: Vec<String> = state
        .index
        .entries
        .iter()
        .filter(|(_, meta)| !on_disk.contains(&meta.filename))
        .map(|(key, _)| key.clone())
        .collect();
    for key in missing {
        log_store_warn!(
            "Entry file is missing, dropping orphaned entry",
            store = core.name.as_str(),
            key = key.as_str()
        );
        state.index.remove(&key, Removal::Orphan);
        report.dropped_entries.push(key);
    }

    report.repaired = state.index.repair();
    Ok(report)
}
