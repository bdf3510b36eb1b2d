//! Persistent store trait and SQLite implementation.
//!
//! The store is a per-collection key-value space of opaque byte blobs. It knows
//! nothing about records or encryption; those live one layer up in
//! [`crate::crypto::SecureStore`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{CacheError, Result};

/// A raw row read back from a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
  pub id: String,
  pub data: Vec<u8>,
}

/// Trait for persistent store backends.
///
/// Each call is its own transaction; callers must not assume atomicity across calls.
pub trait RecordStore: Send + Sync {
  /// Get a single value by id.
  fn get(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>>;

  /// Insert or replace the value stored under `id`.
  fn put(&self, collection: &str, id: &str, data: &[u8]) -> Result<()>;

  fn delete(&self, collection: &str, id: &str) -> Result<()>;

  /// All values of a collection, ordered by id as text (`"10"` sorts before `"2"`).
  fn get_all(&self, collection: &str) -> Result<Vec<StoredRecord>>;

  /// Remove every value of a collection along with its sync cursor.
  fn clear(&self, collection: &str) -> Result<()>;

  /// Collection names with their record counts.
  fn collections(&self) -> Result<Vec<(String, usize)>>;

  /// Last remote cursor seen for a collection (incremental fetching).
  fn cursor(&self, collection: &str) -> Result<Option<String>>;

  fn set_cursor(&self, collection: &str, cursor: Option<&str>) -> Result<()>;

  /// Store-wide metadata (schema-independent settings such as the KDF salt).
  fn meta(&self, key: &str) -> Result<Option<Vec<u8>>>;

  fn set_meta(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Forward-only schema migrations, applied in order and tracked by `PRAGMA user_version`.
const MIGRATIONS: &[&str] = &[
  r#"
-- Cached records, one row per (collection, id). `data` is ciphertext for
-- encrypted collections and serialized JSON otherwise.
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    record_id TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, record_id)
);

-- Per-collection sync state
CREATE TABLE IF NOT EXISTS collection_meta (
    collection TEXT PRIMARY KEY,
    cursor TEXT,
    synced_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
  r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
"#,
];

/// SQLite-based persistent store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::Storage(format!("Failed to create store directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Storage(format!(
        "Failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_connection(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  /// Get the default store path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| CacheError::Config("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("taskmirror").join("cache.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version as usize > MIGRATIONS.len() {
      return Err(CacheError::Storage(format!(
        "Store schema version {} is newer than supported version {}",
        version,
        MIGRATIONS.len()
      )));
    }

    for (index, migration) in MIGRATIONS.iter().enumerate().skip(version as usize) {
      conn
        .execute_batch(migration)
        .map_err(|e| CacheError::Storage(format!("Failed to run migration {}: {}", index + 1, e)))?;
      conn.pragma_update(None, "user_version", (index + 1) as i64)?;
      debug!(version = index + 1, "Applied store migration");
    }

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl RecordStore for SqliteStore {
  fn get(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.lock()?;
    let data = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND record_id = ?",
        params![collection, id],
        |row| row.get(0),
      )
      .optional()?;
    Ok(data)
  }

  fn put(&self, collection: &str, id: &str, data: &[u8]) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO records (collection, record_id, data, stored_at)
       VALUES (?, ?, ?, datetime('now'))
       ON CONFLICT(collection, record_id)
       DO UPDATE SET data = excluded.data, stored_at = excluded.stored_at",
      params![collection, id, data],
    )?;
    Ok(())
  }

  fn delete(&self, collection: &str, id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "DELETE FROM records WHERE collection = ? AND record_id = ?",
      params![collection, id],
    )?;
    Ok(())
  }

  fn get_all(&self, collection: &str) -> Result<Vec<StoredRecord>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT record_id, data FROM records WHERE collection = ? ORDER BY record_id",
    )?;

    let rows = stmt
      .query_map(params![collection], |row| {
        Ok(StoredRecord {
          id: row.get(0)?,
          data: row.get(1)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
  }

  fn clear(&self, collection: &str) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM records WHERE collection = ?", params![collection])?;
    tx.execute(
      "DELETE FROM collection_meta WHERE collection = ?",
      params![collection],
    )?;
    tx.commit()?;
    Ok(())
  }

  fn collections(&self) -> Result<Vec<(String, usize)>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT collection, COUNT(*) FROM records GROUP BY collection ORDER BY collection",
    )?;

    let rows = stmt
      .query_map([], |row| {
        let count: i64 = row.get(1)?;
        Ok((row.get(0)?, count as usize))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
  }

  fn cursor(&self, collection: &str) -> Result<Option<String>> {
    let conn = self.lock()?;
    let cursor: Option<Option<String>> = conn
      .query_row(
        "SELECT cursor FROM collection_meta WHERE collection = ?",
        params![collection],
        |row| row.get(0),
      )
      .optional()?;
    Ok(cursor.flatten())
  }

  fn set_cursor(&self, collection: &str, cursor: Option<&str>) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO collection_meta (collection, cursor, synced_at)
       VALUES (?, ?, datetime('now'))",
      params![collection, cursor],
    )?;
    Ok(())
  }

  fn meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM store_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set_meta(&self, key: &str, value: &[u8]) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?)",
      params![key, value],
    )?;
    Ok(())
  }
}
