//! Entry records, payload values and store counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a payload is laid out on disk.
///
/// A single enum keeps "binary" and "mapping" mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Raw bytes
    Binary,
    /// UTF-8 text
    Text,
    /// JSON object written as text
    Dict,
}

/// Metadata record for one stored entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Disk-relative filename (`key` + extension)
    pub filename: String,
    /// `""` or `".ext"`
    pub extension: String,
    /// Byte size on disk as of the last write or reconcile
    pub size_bytes: u64,
    pub kind: PayloadKind,
    /// Number of successful reads
    pub access_count: u64,
    /// Absent means never expires. Only the cache honors it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: DateTime<Utc>,
}

impl EntryMeta {
    pub fn is_binary(&self) -> bool {
        self.kind == PayloadKind::Binary
    }

    pub fn is_dict(&self) -> bool {
        self.kind == PayloadKind::Dict
    }

    /// An entry whose expiry equals `now` is already expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A payload as handed to or returned from a store
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Dict(serde_json::Map<String, serde_json::Value>),
}

impl Value {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Value::Bytes(_) => PayloadKind::Binary,
            Value::Text(_) => PayloadKind::Text,
            Value::Dict(_) => PayloadKind::Dict,
        }
    }

    /// Wrap a JSON value; only objects are accepted as mappings.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(Value::Dict(map)),
            _ => None,
        }
    }

    /// Serialize to the exact bytes that land on disk.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Value::Bytes(bytes) => Ok(bytes.clone()),
            Value::Text(text) => Ok(text.as_bytes().to_vec()),
            Value::Dict(map) => serde_json::to_vec(map),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Value {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Value::Dict(map)
    }
}

/// Outcome of a lookup: present or absent. Errors travel in the `Result`.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Hit(value) => Lookup::Hit(f(value)),
            Lookup::Miss => Lookup::Miss,
        }
    }
}

/// Counters persisted with the journal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub evictions: u64,
    pub deletions: u64,
    /// Sum of `size_bytes` over all entries
    pub size: u64,
}

impl Statistics {
    /// Fraction of lookups that hit, or 0 before any lookup
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn meta(expires_at: Option<DateTime<Utc>>) -> EntryMeta {
        EntryMeta {
            filename: "k".into(),
            extension: String::new(),
            size_bytes: 0,
            kind: PayloadKind::Text,
            access_count: 0,
            expires_at,
            last_used_at: Utc::now(),
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        assert!(meta(Some(now)).is_expired(now));
        assert!(meta(Some(now - Duration::seconds(1))).is_expired(now));
        assert!(!meta(Some(now + Duration::seconds(1))).is_expired(now));
        assert!(!meta(None).is_expired(now));
    }

    #[test]
    fn test_absent_expiry_is_not_serialized() {
        let json = serde_json::to_string(&meta(None)).unwrap();
        assert!(!json.contains("expires_at"));

        let parsed: EntryMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.expires_at, None);
    }

    #[test]
    fn test_null_expiry_reads_as_absent() {
        let mut value = serde_json::to_value(meta(None)).unwrap();
        value["expires_at"] = serde_json::Value::Null;
        let parsed: EntryMeta = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.expires_at, None);
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(Value::from(b"x".as_slice()).kind(), PayloadKind::Binary);
        assert_eq!(Value::from("x").kind(), PayloadKind::Text);
        let dict = Value::from_json(serde_json::json!({"title": "x"})).unwrap();
        assert_eq!(dict.kind(), PayloadKind::Dict);
        assert!(Value::from_json(serde_json::json!([1, 2])).is_none());
    }

    #[test]
    fn test_lookup_helpers() {
        let hit: Lookup<u8> = Lookup::Hit(3);
        assert!(hit.is_hit());
        assert_eq!(hit.map(|v| v * 2).hit(), Some(6));
        assert!(Lookup::<u8>::Miss.is_miss());
    }

    #[test]
    fn test_hit_ratio() {
        let stats = Statistics {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(Statistics::default().hit_ratio(), 0.0);
    }
}
