//! Table name to cache routing, and the one-way cache to state store sync.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::layer::{EntityCache, FetchSummary};
use super::traits::Record;
use crate::error::{CacheError, Result};
use crate::state::StateStore;

/// Type-erased view of a cache, as seen by the registry.
#[async_trait]
pub trait TableSync: Send + Sync {
  fn collection(&self) -> &str;

  /// Stored records, readable or not.
  fn count(&self) -> Result<usize>;

  /// Every record currently in the persistent store.
  async fn snapshot(&self) -> Result<Vec<Value>>;

  async fn refresh(&self) -> Result<FetchSummary>;
}

#[async_trait]
impl<R: Record> TableSync for EntityCache<R> {
  fn collection(&self) -> &str {
    EntityCache::collection(self)
  }

  fn count(&self) -> Result<usize> {
    self.len()
  }

  async fn snapshot(&self) -> Result<Vec<Value>> {
    self
      .get_all()?
      .iter()
      .map(|record| serde_json::to_value(record).map_err(CacheError::from))
      .collect()
  }

  async fn refresh(&self) -> Result<FetchSummary> {
    self.fetch_from_api().await
  }
}

/// Routes server table names to their caches and pushes cache contents into the
/// state store.
///
/// [`CacheRegistry::sync_table`] is the only path by which cache content reaches the
/// state store; call it after any write that should become visible.
pub struct CacheRegistry {
  caches: BTreeMap<String, Arc<dyn TableSync>>,
  state: Arc<StateStore>,
}

impl CacheRegistry {
  pub fn new(state: Arc<StateStore>) -> Self {
    Self {
      caches: BTreeMap::new(),
      state,
    }
  }

  /// Register a cache under its collection name, replacing any previous one.
  pub fn register(&mut self, cache: Arc<dyn TableSync>) {
    self.caches.insert(cache.collection().to_string(), cache);
  }

  pub fn get(&self, table: &str) -> Option<Arc<dyn TableSync>> {
    self.caches.get(table).cloned()
  }

  pub fn tables(&self) -> impl Iterator<Item = &str> {
    self.caches.keys().map(String::as_str)
  }

  pub fn state(&self) -> &Arc<StateStore> {
    &self.state
  }

  /// Re-read a table from the persistent store and overwrite its state slice.
  ///
  /// Returns the number of records pushed.
  pub async fn sync_table(&self, table: &str) -> Result<usize> {
    let cache = self
      .get(table)
      .ok_or_else(|| CacheError::NotFound(format!("no cache registered for table {}", table)))?;

    let records = cache.snapshot().await?;
    let count = records.len();
    self.state.replace_slice(table, records);

    debug!(table, count, "Synced state slice");
    Ok(count)
  }

  /// Fetch a table from the API, then sync its slice.
  pub async fn refresh_table(&self, table: &str) -> Result<FetchSummary> {
    let cache = self
      .get(table)
      .ok_or_else(|| CacheError::NotFound(format!("no cache registered for table {}", table)))?;

    let summary = cache.refresh().await?;
    self.sync_table(table).await?;
    Ok(summary)
  }

  /// Sync every registered table. Tables sync independently; the first failure is
  /// returned after all of them have been attempted.
  pub async fn sync_all(&self) -> Result<usize> {
    let mut total = 0;
    let mut first_error = None;

    for table in self.caches.keys() {
      match self.sync_table(table).await {
        Ok(count) => total += count,
        Err(e) => {
          first_error.get_or_insert(e);
        }
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(total),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::RecordId;
  use crate::crypto::EncryptionPolicy;
  use crate::events::EventBus;
  use crate::models::{KpiCard, Task};
  use crate::testing::{secure_store, MockApi};
  use serde_json::json;

  fn registry() -> (CacheRegistry, EntityCache<Task>, Arc<MockApi>) {
    let api = MockApi::new();
    let store = secure_store(EncryptionPolicy::default());
    let tasks: EntityCache<Task> = EntityCache::new(store.clone(), api.clone(), EventBus::new());
    let cards: EntityCache<KpiCard> = EntityCache::new(store, api.clone(), EventBus::new());

    let mut registry = CacheRegistry::new(Arc::new(StateStore::new()));
    registry.register(Arc::new(tasks.clone()));
    registry.register(Arc::new(cards));
    (registry, tasks, api)
  }

  #[tokio::test]
  async fn test_sync_pushes_store_contents_into_state() {
    let (registry, tasks, _) = registry();
    tasks.update(1i64, json!({"title": "a"})).unwrap();
    tasks.update(2i64, json!({"title": "b"})).unwrap();

    assert!(registry.state().slice("tasks").is_empty());
    assert_eq!(registry.sync_table("tasks").await.unwrap(), 2);
    assert_eq!(
      registry.state().record("tasks", &RecordId::Int(2)).unwrap()["title"],
      json!("b")
    );
  }

  #[tokio::test]
  async fn test_sync_overwrites_stale_entries() {
    let (registry, tasks, _) = registry();
    tasks.update(1i64, json!({"title": "a"})).unwrap();
    tasks.update(2i64, json!({"title": "b"})).unwrap();
    registry.sync_table("tasks").await.unwrap();

    tasks.delete(&RecordId::Int(2)).unwrap();
    registry.sync_table("tasks").await.unwrap();

    assert_eq!(registry.state().slice("tasks").len(), 1);
    assert!(registry.state().record("tasks", &RecordId::Int(2)).is_none());
  }

  #[tokio::test]
  async fn test_unknown_table_is_not_found() {
    let (registry, _, _) = registry();
    assert!(matches!(
      registry.sync_table("nope").await,
      Err(CacheError::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_refresh_fetches_then_syncs() {
    let (registry, _, api) = registry();
    api.set_table("kpi_cards", vec![json!({"id": 1, "title": "Revenue", "position": 0})]);

    registry.refresh_table("kpi_cards").await.unwrap();
    assert_eq!(api.fetch_count(), 1);
    assert_eq!(registry.state().slice("kpi_cards").len(), 1);
    assert_eq!(registry.tables().collect::<Vec<_>>(), vec!["kpi_cards", "tasks"]);
    assert_eq!(registry.get("kpi_cards").unwrap().count().unwrap(), 1);
  }
}
