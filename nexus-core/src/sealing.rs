//! AEAD sealing of secret bytes with a root-key-derived cipher.
//!
//! A [`SealingKey`] is AES-256-GCM keyed directly with the 32 root-key bytes.
//! Sealed data travels and rests in one wire format:
//!
//! ```text
//! version (1 byte, ASCII '1') | nonce (12 bytes) | ciphertext + tag
//! ```
//!
//! Nonces are freshly random per seal and never reused with the same key.
//! The same primitive serves the persistent backing store (ciphertext at
//! rest) and the encrypt/decrypt service routes, so a blob produced by one
//! can be opened by the other.

use aes_gcm::aead::{Aead as _, AeadCore as _, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit as _, Nonce};

use crate::material::{RootKey, SECRET_LEN};

/// The current (and only) sealing format version byte.
pub const SEALING_VERSION: u8 = b'1';

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Fixed per-record overhead of the wire format (version + nonce + tag).
pub const SEALING_OVERHEAD: usize = 1 + NONCE_LEN + TAG_LEN;

/// Errors of the seal/open primitive.
#[derive(Debug, thiserror::Error)]
pub enum SealingError {
    /// The record is shorter than the fixed format overhead.
    #[error("sealed record too short: {0} bytes")]
    ShortRecord(usize),
    /// The leading version byte is not a known format version.
    #[error("unknown sealing version byte {0:#04x}")]
    UnknownVersion(u8),
    /// Authentication failed; the ciphertext or its metadata was altered.
    #[error("AEAD open failed: ciphertext rejected")]
    OpenFailed,
    /// The AEAD backend refused to seal (effectively unreachable for inputs
    /// within the size caps enforced at the API layer).
    #[error("AEAD seal failed")]
    SealFailed,
}

/// A sealed record: version byte, nonce and ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    /// Format version byte, [`SEALING_VERSION`] for everything we produce.
    pub version: u8,
    /// The random nonce the record was sealed with.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext including the trailing authentication tag.
    pub ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Serializes to the `version | nonce | ciphertext` wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + NONCE_LEN + self.ciphertext.len());
        out.push(self.version);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parses the wire layout.
    ///
    /// # Errors
    ///
    /// Returns [`SealingError::ShortRecord`] when the input cannot even hold
    /// the fixed overhead. The version byte is validated on
    /// [`SealingKey::open`], not here, so callers can surface the version of
    /// a rejected record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SealingError> {
        if bytes.len() < SEALING_OVERHEAD {
            return Err(SealingError::ShortRecord(bytes.len()));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[1..1 + NONCE_LEN]);
        Ok(Self {
            version: bytes[0],
            nonce,
            ciphertext: bytes[1 + NONCE_LEN..].to_vec(),
        })
    }
}

/// The AEAD derived from the root key.
///
/// Cheap to clone; the cell-to-cipher derivation happens once per root-key
/// materialization and the handle is read-only afterwards.
#[derive(Clone)]
pub struct SealingKey(Aes256Gcm);

impl SealingKey {
    /// Derives the AEAD from the root key.
    pub fn new(root_key: &RootKey) -> Self {
        Self::from_key_bytes(root_key.as_bytes())
    }

    /// Derives the AEAD from raw key bytes (test and recovery plumbing).
    pub fn from_key_bytes(key: &[u8; SECRET_LEN]) -> Self {
        Self(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
    }

    /// Seals `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob, SealingError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .0
            .encrypt(&nonce, plaintext)
            .map_err(|_| SealingError::SealFailed)?;
        Ok(SealedBlob {
            version: SEALING_VERSION,
            nonce: nonce.into(),
            ciphertext,
        })
    }

    /// Opens a sealed record, authenticating nonce and ciphertext.
    ///
    /// # Errors
    ///
    /// [`SealingError::UnknownVersion`] for a version byte other than
    /// [`SEALING_VERSION`], [`SealingError::OpenFailed`] when authentication
    /// fails. No plaintext is ever returned from a failed open.
    pub fn open(&self, blob: &SealedBlob) -> Result<Vec<u8>, SealingError> {
        if blob.version != SEALING_VERSION {
            return Err(SealingError::UnknownVersion(blob.version));
        }
        self.0
            .decrypt(Nonce::from_slice(&blob.nonce), blob.ciphertext.as_slice())
            .map_err(|_| SealingError::OpenFailed)
    }
}
