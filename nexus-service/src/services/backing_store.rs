//! Backing store interface for the versioned secret KV.
//!
//! This module defines the [`BackingStore`] trait, which persists and
//! retrieves the per-path [`Secret`] entities and exposes the root-key AEAD
//! for the encryption-as-a-service routes.
//!
//! Current `BackingStore` implementations:
//! - in-memory (development, nothing survives a restart)
//! - sealed SQLite (production, every record AEAD-sealed at rest)

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use nexus_core::sealing::SealingKey;
use nexus_types::secret::{SecretMetadata, SecretPath, SecretVersionStamp, VersionLookupError};

pub mod memory;
pub mod sqlite;

/// Dynamic trait object for the backing store service.
///
/// Must be `Send + Sync` to work with async contexts (e.g., Axum).
pub type BackingStoreService = Arc<dyn BackingStore + Send + Sync>;

/// Errors returned by [`BackingStore`] implementations.
///
/// This error type is mostly used in API contexts, meaning it should be
/// digested by the `crate::api::errors` module.
#[derive(Debug, thiserror::Error)]
pub enum BackingStoreError {
    /// The path has never been written.
    #[error("unknown secret path: {0}")]
    UnknownPath(SecretPath),
    /// The path exists but the requested version is absent or soft-deleted.
    #[error(transparent)]
    Version(#[from] VersionLookupError),
    /// The store is sealed and the cipher has not been installed yet.
    #[error("backing store is not unsealed yet")]
    NotReady,
    /// A record on disk failed to open or parse. This class is fatal for the
    /// record: it indicates tampering, a foreign root key, or on-disk
    /// corruption, none of which self-heal.
    #[error("sealed record corrupt: {0}")]
    Corrupt(String),
    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Trait that implementations of the versioned secret store must provide.
#[async_trait]
pub trait BackingStore {
    /// Installs the root-key-derived cipher once the root-key cell fills.
    /// Further calls are no-ops.
    fn install_cipher(&self, sealing_key: SealingKey);

    /// The installed cipher, used by the encrypt/decrypt routes. `None`
    /// until [`BackingStore::install_cipher`] ran.
    fn sealing_key(&self) -> Option<SealingKey>;

    /// Creates a new version holding `values` and returns its number.
    async fn put(
        &self,
        path: &SecretPath,
        values: HashMap<String, String>,
    ) -> Result<u32, BackingStoreError>;

    /// Reads one version; `0` reads the current version.
    async fn get(
        &self,
        path: &SecretPath,
        version: u32,
    ) -> Result<HashMap<String, String>, BackingStoreError>;

    /// Reads the version map and metadata without any values.
    async fn metadata(
        &self,
        path: &SecretPath,
    ) -> Result<(BTreeMap<u32, SecretVersionStamp>, SecretMetadata), BackingStoreError>;

    /// Soft-deletes the listed versions; empty means current only.
    async fn delete(&self, path: &SecretPath, versions: &[u32]) -> Result<(), BackingStoreError>;

    /// Clears the soft-delete marker on the listed versions.
    async fn undelete(&self, path: &SecretPath, versions: &[u32])
    -> Result<(), BackingStoreError>;

    /// Every known path, regardless of deletion state.
    async fn list(&self) -> Result<Vec<String>, BackingStoreError>;
}

/// Builds the standard backend selected by the configuration: the in-memory
/// store for development, sealed SQLite inside the data directory otherwise.
pub async fn from_config(config: &crate::config::NexusConfig) -> eyre::Result<BackingStoreService> {
    use eyre::Context as _;

    match config.backend {
        crate::config::BackendKind::Memory => {
            Ok(memory::MemoryBackingStore::service(config.max_secret_versions))
        }
        crate::config::BackendKind::SealedPersistent => {
            tokio::fs::create_dir_all(&config.data_dir)
                .await
                .context("while creating the data directory")?;
            sqlite::SqliteBackingStore::init_service(
                &config.store_db_path(),
                config.max_secret_versions,
            )
            .await
        }
    }
}
