//! Signed manifests: authenticate a batch of cached block roots against the
//! server's public key.
//!
//! The signer covers the canonical JSON of `{kid, globalRoot, blockRoots}` with block
//! roots sorted ascending by id, fields in that order, and no whitespace. The
//! verifier rebuilds exactly those bytes, so the order in which block roots arrive
//! does not matter.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::error::{CacheError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRoot {
  pub id: u64,
  pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  /// Id of the key that signed the manifest
  pub kid: String,
  pub global_root: String,
  pub block_roots: Vec<BlockRoot>,
  /// Base64 Ed25519 signature over the canonical bytes
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sig: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalManifest<'a> {
  kid: &'a str,
  global_root: &'a str,
  block_roots: Vec<&'a BlockRoot>,
}

impl Manifest {
  /// The exact bytes the signature covers.
  pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
    let mut block_roots: Vec<&BlockRoot> = self.block_roots.iter().collect();
    // Ties on id fall back to the hash so input order never leaks into the bytes.
    block_roots.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.hash.cmp(&b.hash)));

    serde_json::to_vec(&CanonicalManifest {
      kid: &self.kid,
      global_root: &self.global_root,
      block_roots,
    })
  }
}

/// Decode a base64 Ed25519 public key.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey> {
  let bytes = BASE64
    .decode(encoded.trim())
    .map_err(|e| CacheError::KeyUnavailable(format!("public key is not base64: {}", e)))?;

  let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
    CacheError::KeyUnavailable(format!(
      "public key must be {} bytes, got {}",
      PUBLIC_KEY_LENGTH,
      bytes.len()
    ))
  })?;

  VerifyingKey::from_bytes(&bytes)
    .map_err(|e| CacheError::KeyUnavailable(format!("invalid public key: {}", e)))
}

/// Short hex fingerprint of a key, for logs.
pub fn fingerprint(key: &VerifyingKey) -> String {
  let digest = Sha256::digest(key.as_bytes());
  hex::encode(&digest[..8])
}

/// Verifies manifests, fetching the public key once and caching it.
pub struct ManifestVerifier {
  api: Arc<dyn RemoteApi>,
  key: Mutex<Option<VerifyingKey>>,
}

impl ManifestVerifier {
  pub fn new(api: Arc<dyn RemoteApi>) -> Self {
    Self {
      api,
      key: Mutex::new(None),
    }
  }

  /// Use a known key instead of fetching one.
  pub fn with_key(api: Arc<dyn RemoteApi>, key: VerifyingKey) -> Self {
    Self {
      api,
      key: Mutex::new(Some(key)),
    }
  }

  /// Drop the cached key so the next verification fetches it again.
  pub async fn forget_key(&self) {
    if self.key.lock().await.take().is_some() {
      info!("Forgot cached manifest verification key");
    }
  }

  /// The verification key, fetched on first use.
  ///
  /// Concurrent callers wait on one fetch.
  pub async fn verifying_key(&self) -> Result<VerifyingKey> {
    let mut slot = self.key.lock().await;
    if let Some(key) = slot.as_ref() {
      return Ok(*key);
    }

    let encoded = self
      .api
      .fetch_public_key()
      .await
      .map_err(|e| CacheError::KeyUnavailable(e.to_string()))?;
    let key = decode_public_key(&encoded)?;

    info!(fingerprint = %fingerprint(&key), "Fetched manifest verification key");
    *slot = Some(key);
    Ok(key)
  }

  /// Check a manifest's signature.
  ///
  /// `Err(KeyUnavailable)` means the manifest could not be checked at all. A missing,
  /// malformed or non-matching signature is `Ok(false)`.
  pub async fn verify(&self, manifest: &Manifest) -> Result<bool> {
    let key = self.verifying_key().await?;

    let Some(encoded) = manifest.sig.as_deref() else {
      debug!(kid = %manifest.kid, "Manifest has no signature");
      return Ok(false);
    };

    let signature = match BASE64
      .decode(encoded.trim())
      .ok()
      .and_then(|bytes| Signature::from_slice(&bytes).ok())
    {
      Some(signature) => signature,
      None => {
        debug!(kid = %manifest.kid, "Manifest signature is malformed");
        return Ok(false);
      }
    };

    let canonical = match manifest.canonical_bytes() {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!(kid = %manifest.kid, error = %e, "Failed to canonicalize manifest");
        return Ok(false);
      }
    };

    let valid = key.verify_strict(&canonical, &signature).is_ok();
    if !valid {
      warn!(kid = %manifest.kid, "Manifest signature does not match");
    }
    Ok(valid)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MockApi;
  use ed25519_dalek::{Signer, SigningKey};
  use std::sync::atomic::Ordering;

  fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
  }

  fn signed_manifest(key: &SigningKey) -> Manifest {
    let mut manifest = Manifest {
      kid: "k1".to_string(),
      global_root: "ab12".to_string(),
      block_roots: vec![
        BlockRoot {
          id: 2,
          hash: "bbbb".to_string(),
        },
        BlockRoot {
          id: 1,
          hash: "aaaa".to_string(),
        },
        BlockRoot {
          id: 3,
          hash: "cccc".to_string(),
        },
      ],
      sig: None,
    };
    let signature = key.sign(&manifest.canonical_bytes().unwrap());
    manifest.sig = Some(BASE64.encode(signature.to_bytes()));
    manifest
  }

  fn api_with_key(key: &SigningKey) -> Arc<MockApi> {
    let api = MockApi::new();
    *api.public_key.lock().unwrap() = Some(BASE64.encode(key.verifying_key().to_bytes()));
    api
  }

  #[test]
  fn test_canonical_form_is_sorted_and_compact() {
    let manifest = Manifest {
      kid: "k1".to_string(),
      global_root: "root".to_string(),
      block_roots: vec![
        BlockRoot {
          id: 10,
          hash: "x".to_string(),
        },
        BlockRoot {
          id: 2,
          hash: "y".to_string(),
        },
      ],
      sig: Some("ignored".to_string()),
    };

    assert_eq!(
      String::from_utf8(manifest.canonical_bytes().unwrap()).unwrap(),
      r#"{"kid":"k1","globalRoot":"root","blockRoots":[{"id":2,"hash":"y"},{"id":10,"hash":"x"}]}"#
    );
  }

  #[test]
  fn test_wire_format_parses() {
    let manifest: Manifest = serde_json::from_str(
      r#"{"kid":"k","globalRoot":"g","blockRoots":[{"id":1,"hash":"h"}],"sig":"c2ln"}"#,
    )
    .unwrap();
    assert_eq!(manifest.block_roots.len(), 1);
    assert_eq!(manifest.sig.as_deref(), Some("c2ln"));
  }

  #[tokio::test]
  async fn test_valid_manifest_verifies() {
    let key = signing_key();
    let verifier = ManifestVerifier::new(api_with_key(&key));
    assert!(verifier.verify(&signed_manifest(&key)).await.unwrap());
  }

  #[tokio::test]
  async fn test_reordered_block_roots_still_verify() {
    let key = signing_key();
    let verifier = ManifestVerifier::new(api_with_key(&key));

    let mut manifest = signed_manifest(&key);
    manifest.block_roots.reverse();
    assert!(verifier.verify(&manifest).await.unwrap());
  }

  #[tokio::test]
  async fn test_tampered_block_hash_fails() {
    let key = signing_key();
    let verifier = ManifestVerifier::new(api_with_key(&key));

    for index in 0..3 {
      let mut manifest = signed_manifest(&key);
      let mut bytes = manifest.block_roots[index].hash.clone().into_bytes();
      bytes[0] ^= 0x01;
      manifest.block_roots[index].hash = String::from_utf8(bytes).unwrap();
      assert!(!verifier.verify(&manifest).await.unwrap());
    }
  }

  #[tokio::test]
  async fn test_missing_or_malformed_signature_fails_closed() {
    let key = signing_key();
    let verifier = ManifestVerifier::new(api_with_key(&key));

    let mut manifest = signed_manifest(&key);
    manifest.sig = None;
    assert!(!verifier.verify(&manifest).await.unwrap());

    manifest.sig = Some("!!not base64!!".to_string());
    assert!(!verifier.verify(&manifest).await.unwrap());

    manifest.sig = Some(BASE64.encode([1u8; 10]));
    assert!(!verifier.verify(&manifest).await.unwrap());
  }

  #[tokio::test]
  async fn test_signature_from_other_key_fails() {
    let key = signing_key();
    let other = SigningKey::from_bytes(&[7u8; 32]);
    let verifier = ManifestVerifier::new(api_with_key(&key));
    assert!(!verifier.verify(&signed_manifest(&other)).await.unwrap());
  }

  #[tokio::test]
  async fn test_unavailable_key_is_an_error_not_false() {
    let verifier = ManifestVerifier::new(MockApi::new());
    let result = verifier.verify(&signed_manifest(&signing_key())).await;
    assert!(matches!(result, Err(CacheError::KeyUnavailable(_))));
  }

  #[tokio::test]
  async fn test_garbage_key_is_unavailable() {
    let api = MockApi::new();
    *api.public_key.lock().unwrap() = Some(BASE64.encode([1u8; 5]));
    let verifier = ManifestVerifier::new(api);
    assert!(matches!(
      verifier.verifying_key().await,
      Err(CacheError::KeyUnavailable(_))
    ));
  }

  #[tokio::test]
  async fn test_key_is_fetched_once_until_forgotten() {
    let key = signing_key();
    let api = api_with_key(&key);
    let verifier = ManifestVerifier::new(api.clone());
    let manifest = signed_manifest(&key);

    let (a, b) = tokio::join!(verifier.verify(&manifest), verifier.verify(&manifest));
    assert!(a.unwrap() && b.unwrap());
    assert_eq!(api.key_calls.load(Ordering::SeqCst), 1);

    verifier.forget_key().await;
    verifier.verify(&manifest).await.unwrap();
    assert_eq!(api.key_calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_pinned_key_skips_fetch() {
    let key = signing_key();
    let api = MockApi::new();
    let verifier = ManifestVerifier::with_key(api.clone(), key.verifying_key());
    assert!(verifier.verify(&signed_manifest(&key)).await.unwrap());
    assert_eq!(api.key_calls.load(Ordering::SeqCst), 0);
  }
}
