//! Sealed persistent backing store over SQLite.
//!
//! Each row holds one path and one sealed record; the record's plaintext is
//! the JSON encoding of the per-path [`Secret`] entity and the seal is the
//! root-key AEAD in its `version | nonce | ciphertext` wire format. Nothing
//! in the database is readable without the root key.
//!
//! The pool holds a single connection and mutations additionally take an
//! internal mutex, so writes observe a total order (per path and globally).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use eyre::Context as _;
use nexus_core::sealing::{SealedBlob, SealingKey};
use nexus_types::secret::{Secret, SecretMetadata, SecretPath, SecretVersionStamp};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::instrument;

use super::{BackingStore, BackingStoreError, BackingStoreService};

/// Production backend sealing every record at rest.
pub struct SqliteBackingStore {
    pool: SqlitePool,
    max_versions: u32,
    cipher: OnceLock<SealingKey>,
    write_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    record: Vec<u8>,
}

impl SqliteBackingStore {
    /// Opens (or creates) the database at `db_path` and ensures the schema.
    #[instrument(level = "info", skip_all)]
    pub async fn init(db_path: &Path, max_versions: u32) -> eyre::Result<Self> {
        tracing::info!("opening sealed store at {}", db_path.display());
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        // a single connection doubles as a coarse write serializer at the
        // database level; the mutex above it serializes read-modify-write
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("while opening the sealed store database")?;
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS secrets (
                    path   TEXT PRIMARY KEY,
                    record BLOB NOT NULL
                )
            "#,
        )
        .execute(&pool)
        .await
        .context("while ensuring the secrets schema")?;
        Ok(Self {
            pool,
            max_versions,
            cipher: OnceLock::new(),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Opens the database and returns it as a service object.
    pub async fn init_service(
        db_path: &Path,
        max_versions: u32,
    ) -> eyre::Result<BackingStoreService> {
        Ok(Arc::new(Self::init(db_path, max_versions).await?))
    }

    fn cipher(&self) -> Result<&SealingKey, BackingStoreError> {
        self.cipher.get().ok_or(BackingStoreError::NotReady)
    }

    fn seal_record(&self, secret: &Secret) -> Result<Vec<u8>, BackingStoreError> {
        let plaintext = serde_json::to_vec(secret)
            .map_err(|err| BackingStoreError::Corrupt(format!("encoding secret: {err}")))?;
        let blob = self
            .cipher()?
            .seal(&plaintext)
            .map_err(|err| BackingStoreError::Corrupt(err.to_string()))?;
        Ok(blob.to_bytes())
    }

    fn open_record(&self, record: &[u8]) -> Result<Secret, BackingStoreError> {
        let blob = SealedBlob::from_bytes(record)
            .map_err(|err| BackingStoreError::Corrupt(err.to_string()))?;
        let plaintext = self
            .cipher()?
            .open(&blob)
            .map_err(|err| BackingStoreError::Corrupt(err.to_string()))?;
        serde_json::from_slice(&plaintext)
            .map_err(|err| BackingStoreError::Corrupt(format!("decoding secret: {err}")))
    }

    async fn load(&self, path: &SecretPath) -> Result<Option<Secret>, BackingStoreError> {
        let row: Option<RecordRow> = sqlx::query_as("SELECT record FROM secrets WHERE path = ?1")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| self.open_record(&row.record)).transpose()
    }

    async fn persist(&self, path: &SecretPath, secret: &Secret) -> Result<(), BackingStoreError> {
        let record = self.seal_record(secret)?;
        sqlx::query(
            r#"
                INSERT INTO secrets (path, record) VALUES (?1, ?2)
                ON CONFLICT(path) DO UPDATE SET record = excluded.record
            "#,
        )
        .bind(path.as_str())
        .bind(record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BackingStore for SqliteBackingStore {
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
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut secret = self
            .load(path)
            .await?
            .unwrap_or_else(|| Secret::new(self.max_versions, now));
        let version = secret.upsert(values, now);
        self.persist(path, &secret).await?;
        Ok(version)
    }

    async fn get(
        &self,
        path: &SecretPath,
        version: u32,
    ) -> Result<HashMap<String, String>, BackingStoreError> {
        let secret = self
            .load(path)
            .await?
            .ok_or_else(|| BackingStoreError::UnknownPath(path.clone()))?;
        Ok(secret.version_for_get(version)?.data.clone())
    }

    async fn metadata(
        &self,
        path: &SecretPath,
    ) -> Result<(BTreeMap<u32, SecretVersionStamp>, SecretMetadata), BackingStoreError> {
        let secret = self
            .load(path)
            .await?
            .ok_or_else(|| BackingStoreError::UnknownPath(path.clone()))?;
        Ok((secret.version_stamps(), secret.metadata.clone()))
    }

    async fn delete(&self, path: &SecretPath, versions: &[u32]) -> Result<(), BackingStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut secret = self
            .load(path)
            .await?
            .ok_or_else(|| BackingStoreError::UnknownPath(path.clone()))?;
        secret.mark_deleted(versions, Utc::now());
        self.persist(path, &secret).await
    }

    async fn undelete(
        &self,
        path: &SecretPath,
        versions: &[u32],
    ) -> Result<(), BackingStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut secret = self
            .load(path)
            .await?
            .ok_or_else(|| BackingStoreError::UnknownPath(path.clone()))?;
        secret.undelete(versions, Utc::now());
        self.persist(path, &secret).await
    }

    async fn list(&self) -> Result<Vec<String>, BackingStoreError> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM secrets ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }
}
