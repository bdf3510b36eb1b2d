//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::{ActionContext, Notice, NoticeLevel, Notifier};
use crate::api::{CardPosition, DecisionRequest, DecisionResponse, RemoteApi};
use crate::cache::{CacheRegistry, EntityCache, RecordId, RecordStore, SqliteStore, StoredRecord};
use crate::crypto::{EncryptionPolicy, SecureStore, StoreCipher, KEY_LEN};
use crate::error::{CacheError, Result};
use crate::events::EventBus;
use crate::models::{KpiCard, Task, TaskInstance};
use crate::state::StateStore;

/// Scriptable in-memory API that counts calls.
#[derive(Default)]
pub(crate) struct MockApi {
  pub tables: Mutex<HashMap<String, Vec<Value>>>,
  pub fetch_calls: AtomicUsize,
  pub fetch_since: Mutex<Vec<Option<String>>>,
  pub fetch_delay: Mutex<Option<Duration>>,
  pub fail_fetch: AtomicBool,
  pub decision: Mutex<Option<Result<DecisionResponse>>>,
  pub decisions_seen: Mutex<Vec<DecisionRequest>>,
  pub fail_reorder: AtomicBool,
  pub reorders_seen: Mutex<Vec<Vec<CardPosition>>>,
  pub forbidden_deletes: Mutex<HashSet<RecordId>>,
  pub failing_deletes: Mutex<HashSet<RecordId>>,
  pub deleted: Mutex<Vec<RecordId>>,
  pub restored: Mutex<Vec<Value>>,
  pub public_key: Mutex<Option<String>>,
  pub key_calls: AtomicUsize,
}

impl MockApi {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn set_table(&self, resource: &str, rows: Vec<Value>) {
    self
      .tables
      .lock()
      .unwrap()
      .insert(resource.to_string(), rows);
  }

  pub fn fetch_count(&self) -> usize {
    self.fetch_calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RemoteApi for MockApi {
  async fn fetch_table(&self, resource: &str, since: Option<&str>) -> Result<Vec<Value>> {
    self.fetch_calls.fetch_add(1, Ordering::SeqCst);
    self
      .fetch_since
      .lock()
      .unwrap()
      .push(since.map(String::from));

    let delay = *self.fetch_delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.fail_fetch.load(Ordering::SeqCst) {
      return Err(CacheError::Network("connection refused".to_string()));
    }

    Ok(
      self
        .tables
        .lock()
        .unwrap()
        .get(resource)
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn decide_approval(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
    self.decisions_seen.lock().unwrap().push(request.clone());
    self
      .decision
      .lock()
      .unwrap()
      .clone()
      .unwrap_or_else(|| Ok(DecisionResponse::default()))
  }

  async fn reorder_kpi_cards(&self, cards: &[CardPosition]) -> Result<()> {
    self.reorders_seen.lock().unwrap().push(cards.to_vec());
    if self.fail_reorder.load(Ordering::SeqCst) {
      return Err(CacheError::Network("timed out".to_string()));
    }
    Ok(())
  }

  async fn delete_task(&self, id: &RecordId) -> Result<()> {
    if self.forbidden_deletes.lock().unwrap().contains(id) {
      return Err(CacheError::Authorization(format!("cannot delete task {}", id)));
    }
    if self.failing_deletes.lock().unwrap().contains(id) {
      return Err(CacheError::Api {
        status: 500,
        message: "boom".to_string(),
      });
    }
    self.deleted.lock().unwrap().push(id.clone());
    Ok(())
  }

  async fn restore_task(&self, task: &Value) -> Result<Value> {
    self.restored.lock().unwrap().push(task.clone());
    Ok(task.clone())
  }

  async fn fetch_public_key(&self) -> Result<String> {
    self.key_calls.fetch_add(1, Ordering::SeqCst);
    self
      .public_key
      .lock()
      .unwrap()
      .clone()
      .ok_or_else(|| CacheError::Network("key endpoint unreachable".to_string()))
  }
}

/// In-memory encrypted store with a fixed key.
pub(crate) fn secure_store(policy: EncryptionPolicy) -> Arc<SecureStore> {
  Arc::new(SecureStore::new(
    Arc::new(SqliteStore::open_in_memory().unwrap()),
    Arc::new(policy),
    Some(StoreCipher::from_key([9u8; KEY_LEN])),
  ))
}

/// SQLite store whose writes and full reads can be made to fail on demand.
pub(crate) struct FlakyStore {
  inner: SqliteStore,
  pub fail_put: AtomicBool,
  pub fail_delete: AtomicBool,
  pub fail_get_all: AtomicBool,
}

impl FlakyStore {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      inner: SqliteStore::open_in_memory().unwrap(),
      fail_put: AtomicBool::new(false),
      fail_delete: AtomicBool::new(false),
      fail_get_all: AtomicBool::new(false),
    })
  }

  fn check(flag: &AtomicBool, what: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
      return Err(CacheError::Storage(format!("{} failed: disk full", what)));
    }
    Ok(())
  }
}

impl RecordStore for FlakyStore {
  fn get(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
    self.inner.get(collection, id)
  }

  fn put(&self, collection: &str, id: &str, data: &[u8]) -> Result<()> {
    Self::check(&self.fail_put, "put")?;
    self.inner.put(collection, id, data)
  }

  fn delete(&self, collection: &str, id: &str) -> Result<()> {
    Self::check(&self.fail_delete, "delete")?;
    self.inner.delete(collection, id)
  }

  fn get_all(&self, collection: &str) -> Result<Vec<StoredRecord>> {
    Self::check(&self.fail_get_all, "get_all")?;
    self.inner.get_all(collection)
  }

  fn clear(&self, collection: &str) -> Result<()> {
    self.inner.clear(collection)
  }

  fn collections(&self) -> Result<Vec<(String, usize)>> {
    self.inner.collections()
  }

  fn cursor(&self, collection: &str) -> Result<Option<String>> {
    self.inner.cursor(collection)
  }

  fn set_cursor(&self, collection: &str, cursor: Option<&str>) -> Result<()> {
    self.inner.set_cursor(collection, cursor)
  }

  fn meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
    self.inner.meta(key)
  }

  fn set_meta(&self, key: &str, value: &[u8]) -> Result<()> {
    self.inner.set_meta(key, value)
  }
}

/// Notifier that remembers what it was told.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
  pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
  pub fn count(&self, level: NoticeLevel) -> usize {
    self
      .notices
      .lock()
      .unwrap()
      .iter()
      .filter(|notice| notice.level == level)
      .count()
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, notice: Notice) {
    self.notices.lock().unwrap().push(notice);
  }
}

/// Caches for the tables the orchestrators touch, wired to a mock API.
pub(crate) struct Fixture {
  pub api: Arc<MockApi>,
  pub store: Arc<FlakyStore>,
  pub notices: Arc<RecordingNotifier>,
  pub tasks: EntityCache<Task>,
  pub instances: EntityCache<TaskInstance>,
  pub cards: EntityCache<KpiCard>,
  pub ctx: ActionContext,
}

impl Fixture {
  pub fn state(&self) -> &Arc<StateStore> {
    self.ctx.state()
  }
}

pub(crate) fn fixture() -> Fixture {
  let api = MockApi::new();
  let raw = FlakyStore::new();
  let store = Arc::new(SecureStore::new(
    raw.clone(),
    Arc::new(EncryptionPolicy::default()),
    Some(StoreCipher::from_key([9u8; KEY_LEN])),
  ));
  let events = EventBus::new();

  let tasks: EntityCache<Task> = EntityCache::new(store.clone(), api.clone(), events.clone());
  let instances: EntityCache<TaskInstance> =
    EntityCache::new(store.clone(), api.clone(), events.clone());
  let cards: EntityCache<KpiCard> = EntityCache::new(store, api.clone(), events);

  let mut registry = CacheRegistry::new(Arc::new(StateStore::new()));
  registry.register(Arc::new(tasks.clone()));
  registry.register(Arc::new(instances.clone()));
  registry.register(Arc::new(cards.clone()));

  let notices = Arc::new(RecordingNotifier::default());
  let ctx = ActionContext::new(api.clone(), Arc::new(registry), notices.clone());

  Fixture {
    api,
    store: raw,
    notices,
    tasks,
    instances,
    cards,
    ctx,
  }
}
