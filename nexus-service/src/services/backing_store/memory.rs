//! In-memory backing store for development.
//!
//! Plain maps behind a `RwLock`; no sealing, no persistence, no Keeper
//! distribution required. Data is lost on restart by design.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use nexus_core::sealing::SealingKey;
use nexus_types::secret::{Secret, SecretMetadata, SecretPath, SecretVersionStamp};
use parking_lot::RwLock;

use super::{BackingStore, BackingStoreError, BackingStoreService};

/// Development backend holding everything in process memory.
pub struct MemoryBackingStore {
    max_versions: u32,
    cipher: OnceLock<SealingKey>,
    secrets: RwLock<HashMap<SecretPath, Secret>>,
}

impl MemoryBackingStore {
    /// Creates an empty store with the given per-secret retention window.
    pub fn new(max_versions: u32) -> Self {
        Self {
            max_versions,
            cipher: OnceLock::new(),
            secrets: RwLock::new(HashMap::new()),
        }
    }

    /// Convenience constructor returning the store as a service object.
    pub fn service(max_versions: u32) -> BackingStoreService {
        Arc::new(Self::new(max_versions))
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    fn install_cipher(&self, sealing_key: SealingKey) {
        let _ = self.cipher.set(sealing_key);
    }

    fn sealing_key(&self) -> Option<SealingKey> {
        self.cipher.get().cloned()
    }

    async fn put(
        &self,
        path: &SecretPath,
        values: HashMap<String, String>,
    ) -> Result<u32, BackingStoreError> {
        let now = Utc::now();
        let mut secrets = self.secrets.write();
        let secret = secrets
            .entry(path.clone())
            .or_insert_with(|| Secret::new(self.max_versions, now));
        Ok(secret.upsert(values, now))
    }

    async fn get(
        &self,
        path: &SecretPath,
        version: u32,
    ) -> Result<HashMap<String, String>, BackingStoreError> {
        let secrets = self.secrets.read();
        let secret = secrets
            .get(path)
            .ok_or_else(|| BackingStoreError::UnknownPath(path.clone()))?;
        Ok(secret.version_for_get(version)?.data.clone())
    }

    async fn metadata(
        &self,
        path: &SecretPath,
    ) -> Result<(BTreeMap<u32, SecretVersionStamp>, SecretMetadata), BackingStoreError> {
        let secrets = self.secrets.read();
        let secret = secrets
            .get(path)
            .ok_or_else(|| BackingStoreError::UnknownPath(path.clone()))?;
        Ok((secret.version_stamps(), secret.metadata.clone()))
    }

    async fn delete(&self, path: &SecretPath, versions: &[u32]) -> Result<(), BackingStoreError> {
        let mut secrets = self.secrets.write();
        let secret = secrets
            .get_mut(path)
            .ok_or_else(|| BackingStoreError::UnknownPath(path.clone()))?;
        secret.mark_deleted(versions, Utc::now());
        Ok(())
    }

    async fn undelete(
        &self,
        path: &SecretPath,
        versions: &[u32],
    ) -> Result<(), BackingStoreError> {
        let mut secrets = self.secrets.write();
        let secret = secrets
            .get_mut(path)
            .ok_or_else(|| BackingStoreError::UnknownPath(path.clone()))?;
        secret.undelete(versions, Utc::now());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, BackingStoreError> {
        let mut keys: Vec<String> = self
            .secrets
            .read()
            .keys()
            .map(|path| path.to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
