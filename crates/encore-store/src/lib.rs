//! # encore-store
//!
//! Persistent, journaled key/value storage for the Encore music player.
//!
//! Two stores share one on-disk format:
//!
//! - [`Cache`]: size-bounded and TTL-aware, for derived artifacts (metadata
//!   blobs, playback manifests, resized artwork). Overwrites on `put` and
//!   evicts least recently used entries to stay within budget.
//! - [`Datastore`]: unbounded and never evicted, for user-owned files.
//!   Supports streaming writes through a reserved [`WriteHandle`].
//!
//! Each store owns a directory holding one file per entry plus a JSON
//! journal (see [`journal`]). Every mutating operation saves the journal
//! before returning. A reconcile sweep (see [`reconcile`]) repairs drift
//! between the two after a crash or manual tampering.
//!
//! Stores hold no threads of their own. All methods block on disk I/O and
//! are safe to call from any thread.

pub mod cache;
pub mod clock;
pub mod datastore;
pub mod entry;
pub mod error;
pub mod files;
pub mod fingerprint;
pub mod index;
pub mod journal;
pub mod key;
pub mod reconcile;
pub mod registry;
mod store;

pub use cache::{Cache, EvictionPolicy, PutOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use datastore::{Datastore, WriteHandle};
pub use entry::{EntryMeta, Lookup, PayloadKind, Statistics, Value};
pub use error::{Result, StoreError};
pub use fingerprint::fingerprint;
pub use index::Index;
pub use reconcile::{OrphanPolicy, ReconcileReport};
pub use registry::StoreRegistry;
pub use store::StoreOptions;
