// Authenticated-encryption envelope wrapping every buffer leaving or
// entering the process.
//
// Single-cipher transport: ChaCha20-Poly1305 only. Keys carry an id, are
// tried newest-first on decrypt to support rollover, and only the first
// (newest) key is used to encrypt.

use crate::error::{Result, SwimError};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct EncryptionKey {
    pub id: String,
    material: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn new(id: impl Into<String>, material: [u8; KEY_LEN]) -> Self {
        EncryptionKey { id: id.into(), material }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.material))
    }
}

/// Ordered keyring: `keys[0]` is used to encrypt; every key is tried, in
/// order, to decrypt (supporting rollover where peers haven't yet picked
/// up the newest key).
pub struct KeyRing {
    keys: Vec<EncryptionKey>,
}

impl KeyRing {
    pub fn new(keys: Vec<EncryptionKey>) -> Self {
        KeyRing { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Encrypt `plaintext` under the first (newest) key, prefixing the
    /// output with a random nonce. If the keyring is empty, the buffer
    /// passes through unmodified — encryption is an optional collaborator.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let Some(key) = self.keys.first() else {
            return Ok(plaintext.to_vec());
        };
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = key
            .cipher()
            .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
            .map_err(|_| SwimError::DecryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a sealed buffer, trying each key in order. If the keyring is
    /// empty, the buffer passes through unmodified.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if self.keys.is_empty() {
            return Ok(sealed.to_vec());
        }
        if sealed.len() < NONCE_LEN {
            return Err(SwimError::DecryptFailed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        for key in &self.keys {
            if let Ok(plaintext) = key.cipher().decrypt(nonce, Payload { msg: ciphertext, aad: &[] }) {
                return Ok(plaintext);
            }
        }
        Err(SwimError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> EncryptionKey {
        EncryptionKey::new(format!("k{}", byte), [byte; KEY_LEN])
    }

    #[test]
    fn seal_then_open_round_trips() {
        let ring = KeyRing::new(vec![key(1)]);
        let plaintext = b"gossip payload";
        let sealed = ring.seal(plaintext).unwrap();
        let opened = ring.open(&sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn rollover_tries_older_keys_on_decrypt() {
        let sender_ring = KeyRing::new(vec![key(2)]);
        let receiver_ring = KeyRing::new(vec![key(9), key(2)]);
        let sealed = sender_ring.seal(b"hello").unwrap();
        let opened = receiver_ring.open(&sealed).unwrap();
        assert_eq!(opened, b"hello");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sender_ring = KeyRing::new(vec![key(3)]);
        let receiver_ring = KeyRing::new(vec![key(4)]);
        let sealed = sender_ring.seal(b"hello").unwrap();
        assert!(receiver_ring.open(&sealed).is_err());
    }

    #[test]
    fn empty_keyring_passes_through() {
        let ring = KeyRing::new(vec![]);
        let sealed = ring.seal(b"plain").unwrap();
        assert_eq!(sealed, b"plain");
        assert_eq!(ring.open(&sealed).unwrap(), b"plain");
    }
}
