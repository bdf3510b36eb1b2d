use std::fmt;

use argon2::Argon2;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

/// Symmetric key length (256 bits)
pub const KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Salt length for passphrase key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Authenticated cipher for stored values.
///
/// Sealed values are laid out as `nonce || ciphertext || tag`, with a fresh random
/// nonce per value.
#[derive(Clone)]
pub struct StoreCipher {
  key: [u8; KEY_LEN],
}

impl StoreCipher {
  pub fn from_key(key: [u8; KEY_LEN]) -> Self {
    Self { key }
  }

  /// Derive the store key from a passphrase with Argon2id.
  pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, String> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
      .hash_password_into(passphrase.as_bytes(), salt, &mut key)
      .map_err(|e| format!("Key derivation failed: {}", e))?;
    Ok(Self { key })
  }

  pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
  }

  pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, String> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = self
      .cipher()
      .encrypt(Nonce::from_slice(&nonce), plaintext)
      .map_err(|e| format!("Encryption failed: {}", e))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
  }

  /// Fails on a wrong key or tampered bytes (the auth tag does not match).
  pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, String> {
    if sealed.len() < NONCE_LEN {
      return Err(format!(
        "Sealed value too short: {} bytes",
        sealed.len()
      ));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    self
      .cipher()
      .decrypt(Nonce::from_slice(nonce), ciphertext)
      .map_err(|_| "Authentication failed (wrong key or corrupted value)".to_string())
  }

  fn cipher(&self) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(&self.key))
  }
}

impl fmt::Debug for StoreCipher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoreCipher").finish_non_exhaustive()
  }
}
