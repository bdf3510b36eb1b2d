//! Generic per-table cache: local CRUD plus background reconciliation with the API.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::merge::merge_record;
use super::traits::{Record, RecordId};
use crate::api::RemoteApi;
use crate::crypto::SecureStore;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, Channel, EventBus, EventKind};

/// Outcome of a completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSummary {
  /// Records written or refreshed
  pub upserted: usize,
  /// Records removed (soft-deleted upstream or missing from a full fetch)
  pub removed: usize,
  /// Whether the fetch only asked for changes since the stored cursor
  pub incremental: bool,
  /// Cursor stored for the next incremental fetch
  pub cursor: Option<String>,
}

/// Outcome of loading a collection at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitSummary {
  pub readable: usize,
  pub unreadable: usize,
}

type SharedFetch = Shared<BoxFuture<'static, Result<FetchSummary>>>;

struct Inner {
  collection: &'static str,
  resource: String,
  store: Arc<SecureStore>,
  api: Arc<dyn RemoteApi>,
  events: EventBus,
  ready: OnceCell<InitSummary>,
  /// The outstanding full-table fetch, if any
  in_flight: Mutex<Option<SharedFetch>>,
}

/// Cache for one server table.
///
/// Local reads and writes go straight to the store; [`EntityCache::fetch_from_api`]
/// reconciles with the server. The expected usage is read-local-then-refresh: call
/// [`EntityCache::get_all`] to render immediately, then fire `fetch_from_api` and
/// re-read once it resolves.
pub struct EntityCache<R: Record> {
  inner: Arc<Inner>,
  _record: PhantomData<fn() -> R>,
}

impl<R: Record> EntityCache<R> {
  /// Create a cache whose API resource path equals the collection name.
  pub fn new(store: Arc<SecureStore>, api: Arc<dyn RemoteApi>, events: EventBus) -> Self {
    Self::with_resource(R::collection(), store, api, events)
  }

  pub fn with_resource(
    resource: &str,
    store: Arc<SecureStore>,
    api: Arc<dyn RemoteApi>,
    events: EventBus,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        collection: R::collection(),
        resource: resource.to_string(),
        store,
        api,
        events,
        ready: OnceCell::new(),
        in_flight: Mutex::new(None),
      }),
      _record: PhantomData,
    }
  }

  pub fn collection(&self) -> &'static str {
    self.inner.collection
  }

  /// Load the collection once. Concurrent and repeated calls share the first result.
  pub async fn init(&self) -> Result<InitSummary> {
    let inner = &self.inner;
    let summary = inner
      .ready
      .get_or_try_init(|| async {
        let scan = inner.store.scan(inner.collection)?;
        for error in &scan.unreadable {
          warn!(collection = inner.collection, error = %error, "Unreadable cached record");
        }
        let summary = InitSummary {
          readable: scan.records.len(),
          unreadable: scan.unreadable.len(),
        };
        debug!(
          collection = inner.collection,
          readable = summary.readable,
          unreadable = summary.unreadable,
          "Cache ready"
        );
        Ok::<_, CacheError>(summary)
      })
      .await?;

    Ok(*summary)
  }

  pub fn is_ready(&self) -> bool {
    self.inner.ready.initialized()
  }

  pub fn get(&self, id: &RecordId) -> Result<Option<R>> {
    match self.inner.store.read(self.inner.collection, &id.storage_key())? {
      Some(value) => Ok(Some(serde_json::from_value(value)?)),
      None => Ok(None),
    }
  }

  pub fn get_all(&self) -> Result<Vec<R>> {
    self
      .inner
      .store
      .read_all(self.inner.collection)?
      .into_iter()
      .map(|value| serde_json::from_value(value).map_err(CacheError::from))
      .collect()
  }

  /// Number of stored records, readable or not.
  pub fn len(&self) -> Result<usize> {
    Ok(self.inner.store.raw().get_all(self.inner.collection)?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Merge `partial` into the record stored under `id`, creating it if absent.
  ///
  /// Used for local edits and for applying server-confirmed results alike;
  /// repeating a call with the same input leaves the record unchanged.
  pub fn update(&self, id: impl Into<RecordId>, partial: Value) -> Result<R> {
    let id = id.into();
    let (record, created) = write_merged::<R>(&self.inner, &id, partial, false)?;
    self.emit(
      if created {
        EventKind::Created
      } else {
        EventKind::Updated
      },
      vec![id],
    );
    Ok(record)
  }

  /// Upsert a complete record.
  ///
  /// Unlike [`EntityCache::update`], an unreadable stored copy (for example one
  /// written under a different encryption policy) is overwritten.
  pub fn put(&self, record: &R) -> Result<R> {
    let id = record.id();
    let incoming = serde_json::to_value(record)?;
    let (record, created) = write_merged::<R>(&self.inner, &id, incoming, true)?;
    self.emit(
      if created {
        EventKind::Created
      } else {
        EventKind::Updated
      },
      vec![id],
    );
    Ok(record)
  }

  pub fn delete(&self, id: &RecordId) -> Result<()> {
    self
      .inner
      .store
      .delete(self.inner.collection, &id.storage_key())?;
    self.emit(EventKind::Deleted, vec![id.clone()]);
    Ok(())
  }

  /// Drop every cached record and the sync cursor.
  pub fn clear(&self) -> Result<()> {
    self.inner.store.clear(self.inner.collection)?;
    self.emit(EventKind::Invalidate, Vec::new());
    Ok(())
  }

  /// Last cursor received from the server.
  pub fn cursor(&self) -> Result<Option<String>> {
    self.inner.store.raw().cursor(self.inner.collection)
  }

  /// Fetch the table from the API and reconcile it into the store.
  ///
  /// At most one fetch per cache is outstanding: a caller arriving while one is in
  /// flight awaits that same fetch. On failure the cached records are left as they were.
  pub async fn fetch_from_api(&self) -> Result<FetchSummary> {
    let fetch = {
      let mut slot = self
        .inner
        .in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

      match slot.as_ref() {
        Some(fetch) => {
          debug!(collection = self.inner.collection, "Joining in-flight fetch");
          fetch.clone()
        }
        None => {
          let inner = Arc::clone(&self.inner);
          let fetch = async move {
            let result = run_fetch::<R>(&inner).await;
            inner
              .in_flight
              .lock()
              .unwrap_or_else(|poisoned| poisoned.into_inner())
              .take();
            result
          }
          .boxed()
          .shared();
          *slot = Some(fetch.clone());
          fetch
        }
      }
    };

    fetch.await
  }

  fn emit(&self, kind: EventKind, ids: Vec<RecordId>) {
    emit(&self.inner, kind, ids);
  }
}

impl<R: Record> Clone for EntityCache<R> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      _record: PhantomData,
    }
  }
}

fn emit(inner: &Inner, kind: EventKind, ids: Vec<RecordId>) {
  inner.events.emit(CacheEvent::new(
    kind,
    Channel::for_collection(inner.collection),
    ids,
  ));
}

/// Merge and persist one record. Returns the stored record and whether it is new.
fn write_merged<R: Record>(
  inner: &Inner,
  id: &RecordId,
  incoming: Value,
  overwrite_unreadable: bool,
) -> Result<(R, bool)> {
  if !incoming.is_object() {
    return Err(CacheError::Serialization(format!(
      "Update for {}/{} is not an object",
      inner.collection, id
    )));
  }

  let key = id.storage_key();
  let existing = match inner.store.read(inner.collection, &key) {
    Ok(existing) => existing,
    Err(CacheError::Decryption { reason, .. }) if overwrite_unreadable => {
      debug!(collection = inner.collection, id = %id, reason, "Rewriting unreadable record");
      None
    }
    Err(e) => return Err(e),
  };
  let created = existing.is_none();

  let mut merged = merge_record(existing, incoming);
  if let Value::Object(fields) = &mut merged {
    fields.insert("id".to_string(), id.to_value());
  }

  let record: R = serde_json::from_value(merged)?;
  inner
    .store
    .write(inner.collection, &key, &serde_json::to_value(&record)?)?;

  Ok((record, created))
}

/// Whether `candidate` is a later timestamp than `current`. RFC 3339 values compare as
/// instants, anything else lexically.
fn is_later(candidate: &str, current: &str) -> bool {
  match (
    DateTime::parse_from_rfc3339(candidate),
    DateTime::parse_from_rfc3339(current),
  ) {
    (Ok(candidate), Ok(current)) => candidate > current,
    _ => candidate > current,
  }
}

async fn run_fetch<R: Record>(inner: &Inner) -> Result<FetchSummary> {
  let collection = inner.collection;
  let cursor = inner.store.raw().cursor(collection)?;
  let incremental = cursor.is_some();

  let rows = inner
    .api
    .fetch_table(&inner.resource, cursor.as_deref())
    .await
    .map_err(|e| {
      warn!(collection, error = %e, "Fetch failed, keeping cached data");
      e
    })?;

  // Decode everything before touching the store so a bad payload never half-applies.
  let records = rows
    .into_iter()
    .map(serde_json::from_value::<R>)
    .collect::<std::result::Result<Vec<_>, _>>()?;

  let mut next_cursor = cursor;
  let mut seen = HashSet::with_capacity(records.len());
  let mut changed = Vec::with_capacity(records.len());
  let mut upserted = 0;
  let mut removed = 0;

  for record in &records {
    let id = record.id();
    seen.insert(id.storage_key());

    if let Some(updated) = record.updated_at() {
      if next_cursor.as_deref().map_or(true, |current| is_later(updated, current)) {
        next_cursor = Some(updated.to_string());
      }
    }

    if record.is_deleted() {
      inner.store.delete(collection, &id.storage_key())?;
      removed += 1;
    } else {
      write_merged::<R>(inner, &id, serde_json::to_value(record)?, true)?;
      upserted += 1;
    }
    changed.push(id);
  }

  // A full fetch is authoritative: drop whatever the server no longer has.
  if !incremental {
    for row in inner.store.raw().get_all(collection)? {
      if !seen.contains(&row.id) {
        inner.store.delete(collection, &row.id)?;
        changed.push(RecordId::from_storage_key(&row.id));
        removed += 1;
      }
    }
  }

  inner.store.raw().set_cursor(collection, next_cursor.as_deref())?;

  info!(collection, upserted, removed, incremental, "Fetched table");
  emit(inner, EventKind::BulkUpdate, changed);

  Ok(FetchSummary {
    upserted,
    removed,
    incremental,
    cursor: next_cursor,
  })
}
