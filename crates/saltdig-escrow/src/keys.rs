//! At-rest protection for agent signer keys.
//!
//! The core consumes `encrypt`/`decrypt` as a seam; the provided
//! implementation is ChaCha20-Poly1305 with a fresh nonce per sealing,
//! keyed from `HOSTED_ENCRYPTION_KEY`. Sealed blobs are
//! `nonce || ciphertext`.

use crate::{EscrowError, Result};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;

/// Authenticated encryption seam for signer keys at rest.
pub trait KeyCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

pub struct SealedKeyCipher {
    cipher: ChaCha20Poly1305,
}

impl SealedKeyCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Key material from a 64-char hex string (the env format).
    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|_| EscrowError::Key("encryption key is not hex".into()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EscrowError::Key("encryption key must be 32 bytes".into()))?;
        Ok(Self::new(key))
    }
}

impl KeyCipher for SealedKeyCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EscrowError::Key("sealing failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() <= NONCE_LEN {
            return Err(EscrowError::Key("sealed blob too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EscrowError::Key("unsealing failed (tampered or wrong key)".into()))?;
        Ok(Zeroizing::new(plaintext))
    }
}
