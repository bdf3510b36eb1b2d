//! Core traits and types for the caching system.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Identifier of a record within its collection.
///
/// Servers hand out either numeric or string ids; both are stored under their
/// string form so the key space stays unique per collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
  Int(i64),
  Str(String),
}

impl RecordId {
  /// Key used by the persistent store.
  pub fn storage_key(&self) -> String {
    self.to_string()
  }

  /// Recover an id from its storage key. Keys that are the canonical form of an
  /// integer come back as [`RecordId::Int`].
  pub fn from_storage_key(key: &str) -> Self {
    match key.parse::<i64>() {
      Ok(n) if n.to_string() == key => RecordId::Int(n),
      _ => RecordId::Str(key.to_string()),
    }
  }

  pub fn to_value(&self) -> serde_json::Value {
    match self {
      RecordId::Int(n) => serde_json::Value::from(*n),
      RecordId::Str(s) => serde_json::Value::from(s.as_str()),
    }
  }

  /// Read the `id` field of a JSON record.
  pub fn from_value(value: &serde_json::Value) -> Option<Self> {
    match value.get("id")? {
      serde_json::Value::Number(n) => n.as_i64().map(RecordId::Int),
      serde_json::Value::String(s) => Some(RecordId::Str(s.clone())),
      _ => None,
    }
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecordId::Int(n) => write!(f, "{}", n),
      RecordId::Str(s) => f.write_str(s),
    }
  }
}

impl From<i64> for RecordId {
  fn from(n: i64) -> Self {
    RecordId::Int(n)
  }
}

impl From<&str> for RecordId {
  fn from(s: &str) -> Self {
    RecordId::Str(s.to_string())
  }
}

impl From<String> for RecordId {
  fn from(s: String) -> Self {
    RecordId::Str(s)
  }
}

/// Trait for entities that can be cached.
///
/// The only shape requirement is a unique `id`; everything else about the record is
/// owned by the concrete entity type.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier within the collection
  fn id(&self) -> RecordId;

  /// Collection (server table) name, e.g. "tasks"
  fn collection() -> &'static str;

  /// Last modification timestamp (ISO 8601), used as the incremental fetch cursor.
  fn updated_at(&self) -> Option<&str> {
    None
  }

  /// Soft-delete marker set by the server on incremental fetches.
  fn is_deleted(&self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_storage_key_parses_back_to_same_id() {
    assert_eq!(RecordId::from_storage_key("42"), RecordId::Int(42));
    assert_eq!(RecordId::from_storage_key("-7"), RecordId::Int(-7));
    assert_eq!(RecordId::from_storage_key("abc"), RecordId::Str("abc".into()));
    // Not the canonical integer form, so it must stay a string.
    assert_eq!(RecordId::from_storage_key("007"), RecordId::Str("007".into()));
  }
}
