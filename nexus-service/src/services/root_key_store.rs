//! This module provides [`RootKeyStore`], the process-wide cell holding the
//! active root key. Access is synchronized via a `RwLock` and wrapped in an
//! `Arc` for thread-safe shared ownership.
//!
//! The cell has init-once semantics: it is filled exactly once per process
//! lifetime (day-zero generation, Keeper reconstruction or operator restore)
//! and only an identical key may be "set" again. The stored bytes are zeroed
//! whenever the cell is cleared and when the process drops the store.

use nexus_core::material::{KeyShard, RootKey};
use nexus_core::sealing::SealingKey;
use nexus_core::shamir;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::metrics::METRICS_ID_ROOT_KEY_PRESENT;

/// Errors returned by the [`RootKeyStore`].
#[derive(Debug, thiserror::Error)]
pub enum RootKeyStoreError {
    /// The cell already holds a different key.
    #[error("root key cell is already initialized with a different key")]
    AlreadyInitialized,
    /// The cell holds no key.
    #[error("root key cell is empty")]
    Empty,
    /// Splitting the stored key failed.
    #[error(transparent)]
    Shamir(#[from] shamir::ShamirError),
}

/// The root-key cell.
#[derive(Default, Clone)]
pub struct RootKeyStore(Arc<RwLock<Option<RootKey>>>);

impl RootKeyStore {
    /// Fills the cell.
    ///
    /// Idempotent when `key` equals the stored key (operator restore and the
    /// recovery engine may legitimately race to the same key); a different
    /// key is rejected with [`RootKeyStoreError::AlreadyInitialized`].
    pub fn set(&self, key: RootKey) -> Result<(), RootKeyStoreError> {
        let mut guard = self.0.write();
        match guard.as_ref() {
            None => {
                *guard = Some(key);
                ::metrics::gauge!(METRICS_ID_ROOT_KEY_PRESENT).set(1.0);
                tracing::info!("root key cell filled");
                Ok(())
            }
            Some(existing) if existing.ct_eq(&key) => Ok(()),
            Some(_) => Err(RootKeyStoreError::AlreadyInitialized),
        }
    }

    /// Whether the cell holds no key.
    ///
    /// _Note_ that this acquires a lock internally and returns the result
    /// from that point in time.
    pub fn is_empty(&self) -> bool {
        self.0.read().is_none()
    }

    /// Empties the cell. The previous key is zeroized as it drops.
    pub fn clear(&self) {
        *self.0.write() = None;
        ::metrics::gauge!(METRICS_ID_ROOT_KEY_PRESENT).set(0.0);
        tracing::info!("root key cell cleared");
    }

    /// Derives the AEAD from the stored key, or `None` while empty.
    pub fn sealing_key(&self) -> Option<SealingKey> {
        self.0.read().as_ref().map(SealingKey::new)
    }

    /// Splits the stored key into `n` shards with threshold `t`.
    ///
    /// Runs [`shamir::self_check`] on the result before releasing it, so a
    /// shard set that would not reconstruct the key can never leave the
    /// process.
    pub fn shards(&self, n: u8, t: u8) -> Result<Vec<KeyShard>, RootKeyStoreError> {
        let guard = self.0.read();
        let key = guard.as_ref().ok_or(RootKeyStoreError::Empty)?;
        let shards = shamir::split(key.as_bytes(), n, t)?;
        shamir::self_check(key.as_bytes(), &shards, t)?;
        Ok(shards)
    }
}
