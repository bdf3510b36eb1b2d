use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::info;

/// Per-collection encryption switch.
///
/// Collections are encrypted unless exempted. The policy is shared by reference
/// between every cache of a session and may be flipped at runtime; a flip never
/// rewrites records that are already stored.
#[derive(Debug)]
pub struct EncryptionPolicy {
  default_encrypt: bool,
  overrides: RwLock<HashMap<String, bool>>,
}

impl EncryptionPolicy {
  /// Encrypt everything except the named collections.
  pub fn with_exemptions<I, S>(plaintext: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let overrides = plaintext
      .into_iter()
      .map(|name| (name.as_ref().to_lowercase(), false))
      .collect();

    Self {
      default_encrypt: true,
      overrides: RwLock::new(overrides),
    }
  }

  /// Store every collection in plaintext unless enabled explicitly.
  pub fn plaintext() -> Self {
    Self {
      default_encrypt: false,
      overrides: RwLock::new(HashMap::new()),
    }
  }

  pub fn should_encrypt(&self, collection: &str) -> bool {
    let overrides = self
      .overrides
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    overrides
      .get(&collection.to_lowercase())
      .copied()
      .unwrap_or(self.default_encrypt)
  }

  pub fn set_encryption(&self, collection: &str, enabled: bool) {
    let mut overrides = self
      .overrides
      .write()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous = overrides.insert(collection.to_lowercase(), enabled);
    if previous != Some(enabled) {
      info!(collection, enabled, "Encryption policy changed");
    }
  }

  /// Explicit overrides, for display.
  pub fn overrides(&self) -> BTreeMap<String, bool> {
    let overrides = self
      .overrides
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    overrides.iter().map(|(k, v)| (k.clone(), *v)).collect()
  }
}

impl Default for EncryptionPolicy {
  fn default() -> Self {
    Self::with_exemptions(std::iter::empty::<&str>())
  }
}
