//! Reactive application state: one slice of records per table.
//!
//! Cache-backed slices are written wholesale by [`crate::cache::CacheRegistry`].
//! Orchestrators may patch a slice optimistically and restore a snapshot on failure;
//! nothing else mutates them.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::cache::RecordId;

/// Records of one table keyed by id. Numeric ids sort numerically and before
/// string ids.
pub type Slice = BTreeMap<RecordId, Value>;

/// Capacity of the change notification channel; slow listeners skip ahead.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Notification that a slice changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceChanged {
  pub table: String,
  pub version: u64,
}

/// Saved copy of a slice, for rollback.
#[derive(Debug, Clone)]
pub struct SliceSnapshot {
  table: String,
  records: Option<Slice>,
}

impl SliceSnapshot {
  pub fn table(&self) -> &str {
    &self.table
  }
}

pub struct StateStore {
  slices: RwLock<HashMap<String, Slice>>,
  version: AtomicU64,
  changes: broadcast::Sender<SliceChanged>,
}

impl StateStore {
  pub fn new() -> Self {
    let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
    Self {
      slices: RwLock::new(HashMap::new()),
      version: AtomicU64::new(0),
      changes,
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SliceChanged> {
    self.changes.subscribe()
  }

  /// Monotonic counter bumped on every change.
  pub fn version(&self) -> u64 {
    self.version.load(Ordering::SeqCst)
  }

  /// Records of a table, ordered by id.
  pub fn slice(&self, table: &str) -> Vec<Value> {
    let slices = self.read();
    slices
      .get(table)
      .map(|slice| slice.values().cloned().collect())
      .unwrap_or_default()
  }

  pub fn record(&self, table: &str, id: &RecordId) -> Option<Value> {
    let slices = self.read();
    slices.get(table)?.get(id).cloned()
  }

  pub fn snapshot(&self, table: &str) -> SliceSnapshot {
    SliceSnapshot {
      table: table.to_string(),
      records: self.read().get(table).cloned(),
    }
  }

  /// Put a snapshot back, discarding whatever changed since it was taken.
  pub fn restore(&self, snapshot: SliceSnapshot) {
    let table = snapshot.table.clone();
    {
      let mut slices = self.write();
      match snapshot.records {
        Some(records) => {
          slices.insert(snapshot.table, records);
        }
        None => {
          slices.remove(&snapshot.table);
        }
      }
    }
    self.notify(table);
  }

  /// Apply an immediate, not yet confirmed change to a slice.
  pub fn apply_optimistic<F>(&self, table: &str, change: F)
  where
    F: FnOnce(&mut Slice),
  {
    {
      let mut slices = self.write();
      change(slices.entry(table.to_string()).or_default());
    }
    self.notify(table.to_string());
  }

  /// Overwrite a slice with the cache's current contents.
  pub(crate) fn replace_slice(&self, table: &str, records: Vec<Value>) {
    let mut slice = Slice::new();
    for record in records {
      match RecordId::from_value(&record) {
        Some(id) => {
          slice.insert(id, record);
        }
        None => warn!(table, "Skipping record without id"),
      }
    }

    self.write().insert(table.to_string(), slice);
    self.notify(table.to_string());
  }

  fn notify(&self, table: String) {
    let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
    // No receivers is fine
    let _ = self.changes.send(SliceChanged { table, version });
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Slice>> {
    self
      .slices
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Slice>> {
    self
      .slices
      .write()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl Default for StateStore {
  fn default() -> Self {
    Self::new()
  }
}
