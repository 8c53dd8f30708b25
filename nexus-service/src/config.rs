//! Configuration types and CLI/environment parsing for a Nexus instance.
//!
//! Every knob can be set via `NEXUS_*` environment variables or command line
//! arguments using `clap`. Hosting binaries embed [`NexusConfig`] with
//! `#[clap(flatten)]` and add their own fields (bind address, shutdown
//! grace, ...).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use nexus_types::KeeperId;
use nexus_types::spiffe::TrustDomain;
use url::Url;

/// Which backing store implementation a Nexus runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Development backend: plain maps in process memory, no Keeper
    /// distribution, everything lost on restart.
    Memory,
    /// Production backend: every record sealed with the root-key AEAD and
    /// persisted to SQLite; the root key lives on the Keepers.
    SealedPersistent,
}

/// The static Keeper peer table, parsed from a JSON object `id -> base URL`.
///
/// Held in a `BTreeMap` so iteration follows the lexicographic id order; the
/// i-th id in that order always receives the i-th shard.
#[derive(Debug, Clone, Default)]
pub struct KeeperPeers(BTreeMap<KeeperId, Url>);

impl KeeperPeers {
    /// Number of configured Keepers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates Keepers in lexicographic id order.
    pub fn iter(&self) -> impl Iterator<Item = (&KeeperId, &Url)> {
        self.0.iter()
    }
}

impl FromIterator<(KeeperId, Url)> for KeeperPeers {
    fn from_iter<T: IntoIterator<Item = (KeeperId, Url)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::str::FromStr for KeeperPeers {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(serde_json::from_str(s)?))
    }
}

/// The configuration for the Nexus core service.
#[derive(Parser, Debug, Clone)]
pub struct NexusConfig {
    /// The backing store implementation (`memory` or `sealed-persistent`).
    #[clap(long, env = "NEXUS_BACKEND", default_value = "sealed-persistent")]
    pub backend: BackendKind,

    /// Data directory holding the bootstrap marker and the sealed store.
    #[clap(long, env = "NEXUS_DATA_DIR", default_value = "./nexus-data")]
    pub data_dir: PathBuf,

    /// Number of shards the root key is split into (N).
    #[clap(long, env = "NEXUS_SHAMIR_SHARES", default_value = "3")]
    pub shamir_shares: u8,

    /// Distinct shards required to reconstruct the root key (T).
    ///
    /// With the defaults, any 2 of 3 Keepers restore the system.
    #[clap(long, env = "NEXUS_SHAMIR_THRESHOLD", default_value = "2")]
    pub shamir_threshold: u8,

    /// Retained versions per secret before the oldest is evicted.
    #[clap(long, env = "NEXUS_MAX_SECRET_VERSIONS", default_value = "10")]
    pub max_secret_versions: u32,

    /// How often the live root key is re-split and re-pushed to Keepers.
    #[clap(
        long,
        env = "NEXUS_RESPLIT_INTERVAL",
        default_value = "5min",
        value_parser = humantime::parse_duration
    )]
    pub resplit_interval: Duration,

    /// Per-RPC timeout for Keeper calls.
    #[clap(
        long,
        env = "NEXUS_RPC_TIMEOUT",
        default_value = "15s",
        value_parser = humantime::parse_duration
    )]
    pub rpc_timeout: Duration,

    /// Sleep between Keeper sweeps while recovering or distributing.
    #[clap(
        long,
        env = "NEXUS_RECOVERY_POLL_INTERVAL",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub recovery_poll_interval: Duration,

    /// Cap for the exponential backoff of retried Keeper RPCs.
    #[clap(
        long,
        env = "NEXUS_MAX_BACKOFF",
        default_value = "60s",
        value_parser = humantime::parse_duration
    )]
    pub max_backoff: Duration,

    /// The Keeper peer table as a JSON object `{"id": "https://host:port"}`.
    ///
    /// Required for the sealed-persistent backend.
    #[clap(long, env = "NEXUS_KEEPER_PEERS")]
    pub keeper_peers: Option<KeeperPeers>,

    /// Trust domain of this Nexus itself.
    #[clap(long, env = "NEXUS_TRUST_DOMAIN", default_value = "nexus.internal")]
    pub trust_domain: TrustDomain,

    /// Trust domain Keeper peers must present.
    #[clap(
        long,
        env = "NEXUS_KEEPER_TRUST_DOMAIN",
        default_value = "keeper.nexus.internal"
    )]
    pub keeper_trust_domain: TrustDomain,

    /// Trust domain Pilot (operator break-glass) peers must present.
    #[clap(
        long,
        env = "NEXUS_PILOT_TRUST_DOMAIN",
        default_value = "pilot.nexus.internal"
    )]
    pub pilot_trust_domain: TrustDomain,

    /// Trust domain whose members may use the cipher routes without a policy.
    #[clap(
        long,
        env = "NEXUS_LITE_WORKLOAD_TRUST_DOMAIN",
        default_value = "lite.nexus.internal"
    )]
    pub lite_workload_trust_domain: TrustDomain,

    /// Size cap for plaintext accepted by `/v1/cipher/encrypt`.
    #[clap(long, env = "NEXUS_MAX_PLAINTEXT_SIZE", default_value = "1048576")]
    pub max_plaintext_size: usize,

    /// Size cap for sealed records accepted by `/v1/cipher/decrypt`.
    #[clap(long, env = "NEXUS_MAX_CIPHERTEXT_SIZE", default_value = "1048605")]
    pub max_ciphertext_size: usize,
}

impl NexusConfig {
    /// Validates the cross-field invariants that are fatal at startup:
    /// `1 <= T < N` and, for the sealed backend, a Keeper table with at
    /// least N entries.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.shamir_threshold < 1 || self.shamir_threshold >= self.shamir_shares {
            eyre::bail!(
                "invalid Shamir parameters: shares={}, threshold={} (need 1 <= threshold < shares)",
                self.shamir_shares,
                self.shamir_threshold
            );
        }
        if matches!(self.backend, BackendKind::SealedPersistent) {
            let peers = self
                .keeper_peers
                .as_ref()
                .ok_or_else(|| eyre::eyre!("NEXUS_KEEPER_PEERS is required for the sealed-persistent backend"))?;
            if peers.len() < usize::from(self.shamir_shares) {
                eyre::bail!(
                    "insufficient Keepers configured: {} peers for {} shares",
                    peers.len(),
                    self.shamir_shares
                );
            }
        }
        Ok(())
    }

    /// Path of the sealed store's SQLite database inside the data directory.
    pub fn store_db_path(&self) -> PathBuf {
        self.data_dir.join("store.sqlite")
    }

    /// Path of the bootstrap marker inside the data directory.
    pub fn bootstrap_marker_path(&self) -> PathBuf {
        bootstrap_marker_path(&self.data_dir)
    }
}

/// Name of the presence-only file recording "distribution completed once".
pub const BOOTSTRAP_MARKER: &str = "bootstrap.tombstone";

/// The bootstrap marker path for a given data directory.
pub fn bootstrap_marker_path(data_dir: &Path) -> PathBuf {
    data_dir.join(BOOTSTRAP_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn base_args() -> Vec<&'static str> {
        vec![
            "nexus",
            "--keeper-peers",
            r#"{"k1":"http://127.0.0.1:9001","k2":"http://127.0.0.1:9002","k3":"http://127.0.0.1:9003"}"#,
        ]
    }

    #[test]
    fn defaults_parse_and_validate() {
        let config = NexusConfig::try_parse_from(base_args()).unwrap();
        assert_eq!(config.shamir_shares, 3);
        assert_eq!(config.shamir_threshold, 2);
        assert_eq!(config.resplit_interval, Duration::from_secs(300));
        assert_eq!(config.rpc_timeout, Duration::from_secs(15));
        config.validate().unwrap();
    }

    #[test]
    fn keeper_table_iterates_in_id_order() {
        let config = NexusConfig::try_parse_from(vec![
            "nexus",
            "--keeper-peers",
            r#"{"kc":"http://c/","ka":"http://a/","kb":"http://b/"}"#,
        ])
        .unwrap();
        let ids: Vec<String> = config
            .keeper_peers
            .unwrap()
            .iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, vec!["ka", "kb", "kc"]);
    }

    #[test]
    fn missing_keeper_table_is_fatal_for_sealed_backend() {
        let config = NexusConfig::try_parse_from(vec!["nexus"]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn memory_backend_needs_no_keepers() {
        let config =
            NexusConfig::try_parse_from(vec!["nexus", "--backend", "memory"]).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn too_few_keepers_is_fatal() {
        let config = NexusConfig::try_parse_from(vec![
            "nexus",
            "--keeper-peers",
            r#"{"k1":"http://127.0.0.1:9001"}"#,
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_bounds_are_fatal() {
        let mut args = base_args();
        args.extend(["--shamir-threshold", "3"]);
        let config = NexusConfig::try_parse_from(args).unwrap();
        assert!(config.validate().is_err());
    }
}
