//! Encryption at rest for data files, using AES-256-GCM.

use crate::error::{StorageError, StorageResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub(crate) const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub(crate) const TAG_SIZE: usize = 16;

/// Encryption algorithm applied to a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionAlgorithm {
    /// No encryption.
    #[default]
    None,
    /// AES-256-GCM with a 32-byte key.
    Aes256,
}

impl EncryptionAlgorithm {
    pub(crate) const fn as_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Aes256 => 1,
        }
    }

    pub(crate) fn from_byte(b: u8) -> StorageResult<Self> {
        match b {
            0 => Ok(Self::None),
            1 => Ok(Self::Aes256),
            other => Err(StorageError::corrupted(format!(
                "unknown encryption algorithm byte {other:#04x}"
            ))),
        }
    }
}

/// A 32-byte encryption key, zeroized on drop.
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

    /// Creates a key from raw bytes. The slice must be exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::encryption(format!(
                "invalid key size: expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the raw key bytes. Do not log or persist the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens log frames with AES-256-GCM.
///
/// Frame format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub(crate) struct FrameCipher {
    cipher: Aes256Gcm,
}

impl FrameCipher {
    pub(crate) fn new(key: &EncryptionKey) -> Self {
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key_array),
        }
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StorageError::encryption("frame encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    pub(crate) fn open(&self, sealed: &[u8]) -> StorageResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StorageError::encryption("sealed frame too short"));
        }
        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &sealed[NONCE_SIZE..])
            .map_err(|_| StorageError::encryption("frame decryption failed (wrong key?)"))
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_bytes_size_check() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; 32]).is_ok());
    }

    #[test]
    fn seal_open_round_trip() {
        let key = EncryptionKey::generate();
        let cipher = FrameCipher::new(&key);

        let sealed = cipher.seal(b"frame bytes").unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"frame bytes");
        assert_eq!(cipher.open(&sealed).unwrap(), b"frame bytes");
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = FrameCipher::new(&EncryptionKey::generate())
            .seal(b"secret")
            .unwrap();
        let other = FrameCipher::new(&EncryptionKey::generate());
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn corrupted_frame_fails_to_open() {
        let key = EncryptionKey::generate();
        let cipher = FrameCipher::new(&key);
        let mut sealed = cipher.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.open(&sealed).is_err());
    }

    #[test]
    fn algorithm_byte_round_trip() {
        for alg in [EncryptionAlgorithm::None, EncryptionAlgorithm::Aes256] {
            assert_eq!(EncryptionAlgorithm::from_byte(alg.as_byte()).unwrap(), alg);
        }
        assert!(EncryptionAlgorithm::from_byte(7).is_err());
    }
}
