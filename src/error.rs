//! Error taxonomy shared by the store, cache, crypto and API layers.

use thiserror::Error;

/// Maximum length for response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the data layer.
///
/// Payloads are plain strings so the error is `Clone`: a de-duplicated fetch hands
/// the same failure to every caller that awaited it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
  /// Quota or IO failure on the persistent store. The write is lost.
  #[error("Storage error: {0}")]
  Storage(String),

  /// A stored record could not be decrypted or decoded under the current policy.
  #[error("Record {collection}/{id} is unreadable: {reason}")]
  Decryption {
    collection: String,
    id: String,
    reason: String,
  },

  #[error("Encryption failed for {collection}: {reason}")]
  Encryption { collection: String, reason: String },

  /// The manifest verification key could not be obtained.
  #[error("Verification key unavailable: {0}")]
  KeyUnavailable(String),

  #[error("Network error: {0}")]
  Network(String),

  /// The server refused the operation for this user (HTTP 401/403).
  #[error("Access denied: {0}")]
  Authorization(String),

  #[error("Server returned {status}: {message}")]
  Api { status: u16, message: String },

  #[error("Serialization error: {0}")]
  Serialization(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Undo window has expired")]
  UndoExpired,

  #[error("Configuration error: {0}")]
  Config(String),

  /// The pivot worker thread is gone.
  #[error("Pivot worker has stopped")]
  WorkerStopped,
}

impl CacheError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
      body.to_string()
    } else {
      let mut end = MAX_ERROR_BODY_LENGTH;
      while !body.is_char_boundary(end) {
        end -= 1;
      }
      format!(
        "{}... (truncated, {} total bytes)",
        &body[..end],
        body.len()
      )
    }
  }

  pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
    let truncated = Self::truncate_body(body);
    match status.as_u16() {
      401 | 403 => CacheError::Authorization(truncated),
      404 => CacheError::NotFound(truncated),
      code => CacheError::Api {
        status: code,
        message: truncated,
      },
    }
  }

  /// Expected, user-facing outcomes that are not system faults.
  ///
  /// These are kept out of aggregate failure logging and notifications.
  pub fn is_expected(&self) -> bool {
    matches!(self, CacheError::Authorization(_))
  }
}

impl From<rusqlite::Error> for CacheError {
  fn from(e: rusqlite::Error) -> Self {
    CacheError::Storage(e.to_string())
  }
}

impl From<serde_json::Error> for CacheError {
  fn from(e: serde_json::Error) -> Self {
    CacheError::Serialization(e.to_string())
  }
}

impl From<reqwest::Error> for CacheError {
  fn from(e: reqwest::Error) -> Self {
    match e.status() {
      Some(status) => CacheError::from_status(status, &e.to_string()),
      None => CacheError::Network(e.to_string()),
    }
  }
}
