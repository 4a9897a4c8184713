//! `cache:<name>` / `data:<name>` store references.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use encore_store::{Cache, Datastore, Lookup, ReconcileReport, Statistics, StoreRegistry, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRef {
    Cache(String),
    Data(String),
}

impl FromStr for StoreRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| format!("expected cache:<name> or data:<name>, got {:?}", s))?;
        if name.is_empty() {
            return Err(format!("missing store name in {:?}", s));
        }
        match kind {
            "cache" => Ok(StoreRef::Cache(name.to_string())),
            "data" => Ok(StoreRef::Data(name.to_string())),
            other => Err(format!("unknown store kind {:?} (use cache or data)", other)),
        }
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRef::Cache(name) => write!(f, "cache:{}", name),
            StoreRef::Data(name) => write!(f, "data:{}", name),
        }
    }
}

impl StoreRef {
    pub fn open(&self, registry: &StoreRegistry) -> Result<OpenStore> {
        match self {
            StoreRef::Cache(name) => registry
                .cache(name)
                .map(OpenStore::Cache)
                .with_context(|| format!("Failed to open {}", self)),
            StoreRef::Data(name) => registry
                .datastore(name)
                .map(OpenStore::Data)
                .with_context(|| format!("Failed to open {}", self)),
        }
    }
}

/// Either kind of store, for commands that work on both
pub enum OpenStore {
    Cache(Arc<Cache>),
    Data(Arc<Datastore>),
}

impl OpenStore {
    pub fn directory(&self) -> &Path {
        match self {
            OpenStore::Cache(c) => c.directory(),
            OpenStore::Data(d) => d.directory(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OpenStore::Cache(c) => c.len(),
            OpenStore::Data(d) => d.len(),
        }
    }

    pub fn statistics(&self) -> Statistics {
        match self {
            OpenStore::Cache(c) => c.statistics(),
            OpenStore::Data(d) => d.statistics(),
        }
    }

    pub fn reconcile(&self, restore: bool) -> Result<ReconcileReport> {
        let report = match self {
            OpenStore::Cache(c) => c.reconcile(restore)?,
            OpenStore::Data(d) => d.reconcile(restore)?,
        };
        Ok(report)
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = match self {
            OpenStore::Cache(c) => c.clear()?,
            OpenStore::Data(d) => d.clear()?,
        };
        Ok(removed)
    }

    pub fn get(&self, key: &str) -> Result<Lookup<Value>> {
        let value = match self {
            OpenStore::Cache(c) => c.get(key)?,
            OpenStore::Data(d) => d.get_file(key)?,
        };
        Ok(value)
    }

    pub fn as_cache(&self) -> Option<&Arc<Cache>> {
        match self {
            OpenStore::Cache(c) => Some(c),
            OpenStore::Data(_) => None,
        }
    }
}
