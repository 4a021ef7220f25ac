//! Encryption at rest for the commit log, using AES-256-GCM.
//!
//! Each sealed payload is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! The caller supplies associated data (the frame offset in the log), so a
//! sealed frame cannot be moved to another position without failing
//! authentication.

use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encryption key for a store.
///
/// The key is zeroized when dropped and never printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKeySize`] unless `bytes` is exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Derives a key from a high-entropy passphrase using HKDF-SHA256.
    ///
    /// HKDF does not stretch weak passwords; feed it generated secrets.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> CoreResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"modelstore-log-key-v1", &mut bytes)
            .map_err(|_| CoreError::key_derivation_failed("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    /// Returns the raw key bytes. Do not log the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        // Fold over every byte so comparison time does not depend on
        // where the keys first differ.
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for EncryptionKey {}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens log payloads.
pub struct CryptoManager {
    cipher: Aes256Gcm,
}

impl CryptoManager {
    /// Creates a manager for the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CoreError::encryption_failed("AES-GCM seal failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Decrypts a payload produced by [`seal`](Self::seal) with the same `aad`.
    ///
    /// # Errors
    ///
    /// Fails on a wrong key, a different `aad`, or tampered bytes.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::decryption_failed("sealed payload too short"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CoreError::decryption_failed("authentication failed"))
    }
}

impl std::fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoManager").finish_non_exhaustive()
    }
}
