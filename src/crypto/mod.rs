//! Selective record encryption.
//!
//! - [`EncryptionPolicy`] decides per collection whether values are encrypted
//! - [`StoreCipher`] seals values with ChaCha20-Poly1305 under a passphrase-derived key
//! - [`SecureStore`] applies both on top of a [`crate::cache::RecordStore`]

mod cipher;
mod policy;
mod secure;

pub use cipher::{StoreCipher, KEY_LEN, NONCE_LEN, SALT_LEN};
pub use policy::EncryptionPolicy;
pub use secure::{Scan, SecureStore};
