//! Bootstrap / recovery engine.
//!
//! This module provides [`bootstrap_task`], the long-lived task that decides
//! at startup whether this is day zero, a restart, or a disaster recovery,
//! and converges without operator intervention:
//!
//! ```text
//! START ── marker? ──┬─ yes ─► RECOVERING ─► RECONSTRUCT ─┐
//!                    └─ no ──► DAY_ZERO ──► DISTRIBUTE ───┤ (marker written)
//!                                                         ▼
//!                                                      STEADY ─► periodic re-split
//! ```
//!
//! Fatal conditions (shard reconstruction failure, split self-check failure,
//! marker-write failure, a root-key cell conflict) end the task with an
//! error; the drop guard then cancels the service-wide token so the hosting
//! binary exits loudly. Transient Keeper failures are logged and retried
//! forever.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable as _};
use eyre::Context as _;
use eyre::ContextCompat as _;
use nexus_core::material::{KeyShard, RootKey, ShareIndex};
use nexus_core::shamir;
use nexus_types::KeeperId;
use rand::rngs::OsRng;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize as _;

use crate::config::{BackendKind, KeeperPeers, bootstrap_marker_path};
use crate::metrics::{
    METRICS_ID_BOOTSTRAP_SHARDS_COLLECTED, METRICS_ID_DISTRIBUTIONS_COMPLETED,
    METRICS_ID_KEEPER_CONTRIBUTE_ERROR, METRICS_ID_KEEPER_CONTRIBUTE_SUCCESS,
};
use crate::services::backing_store::BackingStoreService;
use crate::services::keeper_client::KeeperClient;
use crate::services::root_key_store::RootKeyStore;

/// The arguments to start the bootstrap engine.
pub(crate) struct BootstrapTaskArgs {
    pub(crate) backend: BackendKind,
    pub(crate) keeper_peers: KeeperPeers,
    pub(crate) shares: u8,
    pub(crate) threshold: u8,
    pub(crate) data_dir: PathBuf,
    pub(crate) recovery_poll_interval: Duration,
    pub(crate) resplit_interval: Duration,
    pub(crate) max_backoff: Duration,
    pub(crate) keeper_client: KeeperClient,
    pub(crate) root_key_store: RootKeyStore,
    pub(crate) backing_store: BackingStoreService,
    pub(crate) cancellation_token: CancellationToken,
}

/// Background task that materializes the root key and keeps the Keeper set
/// armed with fresh shards.
pub(crate) async fn bootstrap_task(args: BootstrapTaskArgs) -> eyre::Result<()> {
    // shutdown the whole service if the engine encounters a fatal error and drops this guard
    let cancellation_token = args.cancellation_token.clone();
    let _drop_guard = cancellation_token.drop_guard_ref();

    tracing::info!("starting bootstrap engine");
    let result = run(args).await;
    match result.as_ref() {
        Ok(_) => tracing::info!("bootstrap engine stopped without error"),
        Err(err) => tracing::error!("bootstrap engine failed: {err:?}"),
    }
    result
}

/// Outcome of one engine phase.
enum Phase {
    Ready,
    Cancelled,
}

struct Engine {
    keeper_peers: KeeperPeers,
    shares: u8,
    threshold: u8,
    recovery_poll_interval: Duration,
    resplit_interval: Duration,
    max_backoff: Duration,
    marker_path: PathBuf,
    keeper_client: KeeperClient,
    root_key_store: RootKeyStore,
    backing_store: BackingStoreService,
    cancellation_token: CancellationToken,
}

async fn run(args: BootstrapTaskArgs) -> eyre::Result<()> {
    let BootstrapTaskArgs {
        backend,
        keeper_peers,
        shares,
        threshold,
        data_dir,
        recovery_poll_interval,
        resplit_interval,
        max_backoff,
        keeper_client,
        root_key_store,
        backing_store,
        cancellation_token,
    } = args;

    if matches!(backend, BackendKind::Memory) {
        // development backend: ephemeral root key, no Keeper traffic, no marker
        let key = RootKey::generate(&mut OsRng);
        root_key_store.set(key)?;
        let sealing_key = root_key_store
            .sealing_key()
            .context("root key cell is empty")?;
        backing_store.install_cipher(sealing_key);
        tracing::info!("in-memory backend ready: ephemeral root key, no shard distribution");
        cancellation_token.cancelled().await;
        return Ok(());
    }

    let engine = Engine {
        marker_path: bootstrap_marker_path(&data_dir),
        keeper_peers,
        shares,
        threshold,
        recovery_poll_interval,
        resplit_interval,
        max_backoff,
        keeper_client,
        root_key_store,
        backing_store,
        cancellation_token,
    };

    let marker_exists = tokio::fs::try_exists(&engine.marker_path)
        .await
        .context("while checking for the bootstrap marker")?;
    let phase = if marker_exists {
        tracing::info!("bootstrap marker present, recovering root key from keepers");
        engine.recover_from_keepers().await?
    } else {
        tracing::info!("no bootstrap marker, running day-zero initialization");
        engine.day_zero().await?
    };
    match phase {
        Phase::Cancelled => Ok(()),
        Phase::Ready => engine.steady_state().await,
    }
}

impl Engine {
    /// RECOVERING: sweep the Keeper set until `threshold` distinct shards
    /// are held, then RECONSTRUCT.
    async fn recover_from_keepers(&self) -> eyre::Result<Phase> {
        let mut collected: BTreeMap<ShareIndex, KeyShard> = BTreeMap::new();
        loop {
            if !self.root_key_store.is_empty() {
                // an operator restore filled the cell while we were polling
                tracing::info!("root key appeared during recovery, skipping reconstruction");
                self.install_cipher()?;
                return Ok(Phase::Ready);
            }
            for (position, (keeper_id, url)) in self.shard_holders() {
                let index = index_for_position(position);
                if collected.contains_key(&index) {
                    continue;
                }
                match self.keeper_client.fetch_shard(keeper_id, url).await {
                    Ok(Some(secret)) => {
                        collected.insert(index, KeyShard { index, secret });
                        ::metrics::gauge!(METRICS_ID_BOOTSTRAP_SHARDS_COLLECTED)
                            .set(collected.len() as f64);
                        tracing::info!(
                            "collected shard from keeper {keeper_id} ({}/{})",
                            collected.len(),
                            self.threshold
                        );
                    }
                    Ok(None) => tracing::debug!("keeper {keeper_id} holds no shard yet"),
                    Err(err) => {
                        tracing::warn!("could not fetch shard from keeper {keeper_id}: {err}")
                    }
                }
                if collected.len() >= usize::from(self.threshold) {
                    break;
                }
            }
            if collected.len() >= usize::from(self.threshold) {
                self.reconstruct(&collected)?;
                return Ok(Phase::Ready);
            }
            tracing::info!(
                "holding {}/{} shards, next sweep in {:?}",
                collected.len(),
                self.threshold,
                self.recovery_poll_interval
            );
            if !self.pause(self.recovery_poll_interval).await {
                return Ok(Phase::Cancelled);
            }
        }
    }

    /// RECONSTRUCT: recover the key and validate the collected shard set
    /// against a re-split before going live. Never falls back to day zero.
    fn reconstruct(&self, collected: &BTreeMap<ShareIndex, KeyShard>) -> eyre::Result<()> {
        let shards: Vec<KeyShard> = collected.values().cloned().collect();
        let mut bytes = shamir::recover(&shards, self.threshold)
            .context("shard reconstruction failed, manual re-key required")?;
        // splits are deterministic, so a re-split of the candidate key must
        // reproduce every collected shard; a mismatch means the keeper set
        // disagrees about which root key it is holding
        let reference = shamir::split(&bytes, self.shares, self.threshold)?;
        for shard in &shards {
            let expected = &reference[usize::from(shard.index.get()) - 1];
            if !shard.secret.ct_eq(&expected.secret) {
                bytes.zeroize();
                eyre::bail!(
                    "keeper shard set is mutually inconsistent, manual re-key required"
                );
            }
        }
        let key = RootKey::from_bytes(bytes);
        bytes.zeroize();
        self.root_key_store
            .set(key)
            .context("while filling the root key cell")?;
        self.install_cipher()?;
        tracing::info!("root key reconstructed from {} keeper shards", shards.len());
        Ok(())
    }

    /// DAY_ZERO: generate, self-check, go live, then DISTRIBUTE and write
    /// the marker.
    async fn day_zero(&self) -> eyre::Result<Phase> {
        let key = RootKey::generate(&mut OsRng);
        let shards = shamir::split(key.as_bytes(), self.shares, self.threshold)?;
        shamir::self_check(key.as_bytes(), &shards, self.threshold)
            .context("freshly split shards failed the self-check")?;
        self.root_key_store
            .set(key)
            .context("while filling the root key cell")?;
        self.install_cipher()?;
        tracing::info!(
            "generated fresh root key, distributing {} shards to keepers",
            shards.len()
        );
        if matches!(self.distribute(&shards).await?, Phase::Cancelled) {
            return Ok(Phase::Cancelled);
        }
        self.write_marker().await?;
        Ok(Phase::Ready)
    }

    /// DISTRIBUTE: loop with sticky per-Keeper acks until every shard
    /// holder acked its shard.
    async fn distribute(&self, shards: &[KeyShard]) -> eyre::Result<Phase> {
        let mut acked: BTreeSet<KeeperId> = BTreeSet::new();
        loop {
            for (position, (keeper_id, url)) in self.shard_holders() {
                if acked.contains(keeper_id) {
                    continue;
                }
                let shard = &shards[position];
                let result = (|| self.keeper_client.contribute(keeper_id, url, &shard.secret))
                    .retry(ExponentialBuilder::default().with_max_delay(self.max_backoff))
                    .notify(|err, delay| {
                        tracing::warn!("shard push failed, retrying in {delay:?}: {err}")
                    })
                    .await;
                match result {
                    Ok(()) => {
                        ::metrics::counter!(METRICS_ID_KEEPER_CONTRIBUTE_SUCCESS).increment(1);
                        tracing::info!("keeper {keeper_id} acked shard {}", shard.index);
                        acked.insert(keeper_id.clone());
                    }
                    Err(err) => {
                        ::metrics::counter!(METRICS_ID_KEEPER_CONTRIBUTE_ERROR).increment(1);
                        tracing::warn!(
                            "keeper {keeper_id} unreachable, will retry next sweep: {err}"
                        );
                    }
                }
            }
            if acked.len() == usize::from(self.shares) {
                ::metrics::counter!(METRICS_ID_DISTRIBUTIONS_COMPLETED).increment(1);
                return Ok(Phase::Ready);
            }
            if !self.pause(self.recovery_poll_interval).await {
                return Ok(Phase::Cancelled);
            }
        }
    }

    /// STEADY: periodically re-split the live key and re-push best-effort,
    /// so replaced or late-provisioned Keepers re-arm without operator
    /// action.
    async fn steady_state(&self) -> eyre::Result<()> {
        tracing::info!(
            "entering steady state, refreshing keeper shards every {:?}",
            self.resplit_interval
        );
        loop {
            if !self.pause(self.resplit_interval).await {
                return Ok(());
            }
            if let Err(err) = self.resplit_and_push().await {
                tracing::warn!("periodic shard refresh failed, retrying next tick: {err:?}");
            }
        }
    }

    async fn resplit_and_push(&self) -> eyre::Result<()> {
        let shards = self.root_key_store.shards(self.shares, self.threshold)?;
        let mut delivered = 0usize;
        for (position, (keeper_id, url)) in self.shard_holders() {
            match self
                .keeper_client
                .contribute(keeper_id, url, &shards[position].secret)
                .await
            {
                Ok(()) => {
                    ::metrics::counter!(METRICS_ID_KEEPER_CONTRIBUTE_SUCCESS).increment(1);
                    delivered += 1;
                }
                Err(err) => {
                    ::metrics::counter!(METRICS_ID_KEEPER_CONTRIBUTE_ERROR).increment(1);
                    tracing::warn!("refresh push to keeper {keeper_id} failed: {err}");
                }
            }
        }
        tracing::debug!("refreshed shards at {delivered}/{} keepers", self.shares);
        if delivered == usize::from(self.shares) {
            ::metrics::counter!(METRICS_ID_DISTRIBUTIONS_COMPLETED).increment(1);
        }
        Ok(())
    }

    /// The first N Keepers in lexicographic id order hold the N shards;
    /// any further configured Keepers are spares.
    fn shard_holders(&self) -> impl Iterator<Item = (usize, (&KeeperId, &url::Url))> {
        self.keeper_peers
            .iter()
            .take(usize::from(self.shares))
            .enumerate()
    }

    fn install_cipher(&self) -> eyre::Result<()> {
        let sealing_key = self
            .root_key_store
            .sealing_key()
            .context("root key cell is empty")?;
        self.backing_store.install_cipher(sealing_key);
        Ok(())
    }

    async fn write_marker(&self) -> eyre::Result<()> {
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.marker_path)
            .await
            .with_context(|| {
                format!(
                    "while creating the bootstrap marker at {}",
                    self.marker_path.display()
                )
            })?;
        tracing::info!("bootstrap marker written, initial distribution complete");
        Ok(())
    }

    // false when the cancellation token fired during the pause
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancellation_token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

// positions come from `shard_holders`, so `position + 1` fits a u8
fn index_for_position(position: usize) -> ShareIndex {
    ShareIndex::new(u8::try_from(position + 1).expect("share count fits a u8"))
        .expect("positions are zero-based")
}
