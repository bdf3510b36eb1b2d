use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{EncryptionPolicy, StoreCipher};
use crate::cache::RecordStore;
use crate::error::{CacheError, Result};

/// Store-wide metadata key holding the passphrase salt.
const SALT_META_KEY: &str = "kdf_salt";

/// Result of reading a whole collection without stopping at the first bad row.
#[derive(Debug, Default)]
pub struct Scan {
  pub records: Vec<Value>,
  pub unreadable: Vec<CacheError>,
}

/// Encryption layer over a [`RecordStore`].
///
/// Values of collections the policy marks as encrypted are sealed before they reach the
/// store and opened after they are read. Reads follow the policy as it is *now*: a
/// record written under a different policy fails to decode until it is rewritten.
pub struct SecureStore {
  store: Arc<dyn RecordStore>,
  policy: Arc<EncryptionPolicy>,
  cipher: Option<StoreCipher>,
}

impl SecureStore {
  pub fn new(
    store: Arc<dyn RecordStore>,
    policy: Arc<EncryptionPolicy>,
    cipher: Option<StoreCipher>,
  ) -> Self {
    Self {
      store,
      policy,
      cipher,
    }
  }

  /// Build the layer from a passphrase, creating the store salt on first use.
  ///
  /// Without a passphrase only plaintext collections are usable.
  pub fn unlock(
    store: Arc<dyn RecordStore>,
    policy: Arc<EncryptionPolicy>,
    passphrase: Option<&str>,
  ) -> Result<Self> {
    let cipher = match passphrase {
      Some(passphrase) => {
        let salt = match store.meta(SALT_META_KEY)? {
          Some(salt) => salt,
          None => {
            let salt = StoreCipher::generate_salt().to_vec();
            store.set_meta(SALT_META_KEY, &salt)?;
            debug!("Generated new store salt");
            salt
          }
        };
        Some(StoreCipher::from_passphrase(passphrase, &salt).map_err(CacheError::Config)?)
      }
      None => {
        warn!("No store passphrase configured, encrypted collections are unavailable");
        None
      }
    };

    Ok(Self::new(store, policy, cipher))
  }

  pub fn policy(&self) -> &Arc<EncryptionPolicy> {
    &self.policy
  }

  pub fn raw(&self) -> &Arc<dyn RecordStore> {
    &self.store
  }

  pub fn read(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    match self.store.get(collection, id)? {
      Some(bytes) => self.decode(collection, id, &bytes).map(Some),
      None => Ok(None),
    }
  }

  pub fn write(&self, collection: &str, id: &str, value: &Value) -> Result<()> {
    let bytes = self.encode(collection, value)?;
    self.store.put(collection, id, &bytes)
  }

  pub fn delete(&self, collection: &str, id: &str) -> Result<()> {
    self.store.delete(collection, id)
  }

  pub fn clear(&self, collection: &str) -> Result<()> {
    self.store.clear(collection)
  }

  /// Every record of a collection; the first unreadable one fails the whole read.
  pub fn read_all(&self, collection: &str) -> Result<Vec<Value>> {
    self
      .store
      .get_all(collection)?
      .into_iter()
      .map(|row| self.decode(collection, &row.id, &row.data))
      .collect()
  }

  /// Every readable record of a collection, collecting failures instead of stopping.
  pub fn scan(&self, collection: &str) -> Result<Scan> {
    let mut scan = Scan::default();
    for row in self.store.get_all(collection)? {
      match self.decode(collection, &row.id, &row.data) {
        Ok(value) => scan.records.push(value),
        Err(e) => scan.unreadable.push(e),
      }
    }
    Ok(scan)
  }

  fn encode(&self, collection: &str, value: &Value) -> Result<Vec<u8>> {
    let plaintext = serde_json::to_vec(value)?;
    if !self.policy.should_encrypt(collection) {
      return Ok(plaintext);
    }

    let cipher = self.cipher.as_ref().ok_or_else(|| CacheError::Encryption {
      collection: collection.to_string(),
      reason: "no store key available".to_string(),
    })?;

    cipher
      .seal(&plaintext)
      .map_err(|reason| CacheError::Encryption {
        collection: collection.to_string(),
        reason,
      })
  }

  fn decode(&self, collection: &str, id: &str, bytes: &[u8]) -> Result<Value> {
    let unreadable = |reason: String| CacheError::Decryption {
      collection: collection.to_string(),
      id: id.to_string(),
      reason,
    };

    let plaintext = if self.policy.should_encrypt(collection) {
      let cipher = self
        .cipher
        .as_ref()
        .ok_or_else(|| unreadable("no store key available".to_string()))?;
      cipher.open(bytes).map_err(unreadable)?
    } else {
      bytes.to_vec()
    };

    serde_json::from_slice(&plaintext).map_err(|e| unreadable(format!("not a record: {}", e)))
  }
}
