//! Operator break-glass recovery.
//!
//! This module provides [`RecoveryService`], which backs the
//! `/v1/operator/recover` and `/v1/operator/restore` routes. `recover`
//! exports the shard set of the live root key for a Pilot to store offline;
//! `restore` accepts those shards back one at a time and, once the threshold
//! is reached, fills the root-key cell and unseals the backing store.
//!
//! Restore works while the rest of the service answers 503: it is exactly the
//! path out of a disaster where too few Keepers survived.

use std::sync::Arc;

use nexus_core::material::{KeyShard, RootKey};
use nexus_core::shamir::{self, ShamirError};
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::backing_store::BackingStoreService;
use super::root_key_store::{RootKeyStore, RootKeyStoreError};

/// Errors returned by the [`RecoveryService`].
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// `recover` was called while the root-key cell is empty.
    #[error("root key cell is empty, nothing to export")]
    NothingToExport,
    /// The collected shards do not reconstruct a key.
    #[error(transparent)]
    Shamir(#[from] ShamirError),
    /// The restored key conflicts with a key that is already live.
    #[error("restored key conflicts with the live root key")]
    Conflict,
}

/// Progress of an ongoing restore.
#[derive(Debug, Clone, Copy)]
pub struct RestoreStatus {
    /// Distinct shards collected so far (0 again once restored).
    pub collected: usize,
    /// Distinct shards a restore needs.
    pub threshold: u8,
    /// Whether the root key is live.
    pub restored: bool,
}

struct Inner {
    shares: u8,
    threshold: u8,
    collected: Mutex<BTreeMap<nexus_core::material::ShareIndex, KeyShard>>,
    root_key_store: RootKeyStore,
    backing_store: BackingStoreService,
}

/// Break-glass shard export/import, shared by the operator routes.
#[derive(Clone)]
pub struct RecoveryService(Arc<Inner>);

impl RecoveryService {
    /// Creates the service for the given split parameters.
    pub fn new(
        shares: u8,
        threshold: u8,
        root_key_store: RootKeyStore,
        backing_store: BackingStoreService,
    ) -> Self {
        Self(Arc::new(Inner {
            shares,
            threshold,
            collected: Mutex::new(BTreeMap::new()),
            root_key_store,
            backing_store,
        }))
    }

    /// Exports the shard set of the live root key.
    ///
    /// Splits are deterministic, so the exported set is identical to the set
    /// the Keepers hold and repeated exports agree with each other.
    pub fn export(&self) -> Result<(Vec<KeyShard>, u8), RecoveryError> {
        let shards = self
            .0
            .root_key_store
            .shards(self.0.shares, self.0.threshold)
            .map_err(|err| match err {
                RootKeyStoreError::Empty => RecoveryError::NothingToExport,
                RootKeyStoreError::Shamir(inner) => RecoveryError::Shamir(inner),
                RootKeyStoreError::AlreadyInitialized => RecoveryError::Conflict,
            })?;
        Ok((shards, self.0.threshold))
    }

    /// Accepts one operator shard; restores the root key once `threshold`
    /// distinct shards are in.
    pub fn restore(&self, shard: KeyShard) -> Result<RestoreStatus, RecoveryError> {
        let mut collected = self.0.collected.lock();
        if !self.0.root_key_store.is_empty() {
            // already live (a parallel restore or the recovery engine won)
            collected.clear();
            return Ok(self.status(0));
        }
        collected.insert(shard.index, shard);
        if collected.len() < usize::from(self.0.threshold) {
            return Ok(self.status(collected.len()));
        }

        let shards: Vec<KeyShard> = collected.values().cloned().collect();
        let bytes = shamir::recover(&shards, self.0.threshold)?;
        let key = RootKey::from_bytes(bytes);
        self.0
            .root_key_store
            .set(key)
            .map_err(|_| RecoveryError::Conflict)?;
        let sealing_key = self
            .0
            .root_key_store
            .sealing_key()
            .expect("cell was just filled");
        self.0.backing_store.install_cipher(sealing_key);
        collected.clear();
        tracing::info!("root key restored from operator shards");
        Ok(self.status(0))
    }

    fn status(&self, collected: usize) -> RestoreStatus {
        RestoreStatus {
            collected,
            threshold: self.0.threshold,
            restored: !self.0.root_key_store.is_empty(),
        }
    }
}
