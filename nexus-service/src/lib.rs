#![deny(missing_docs)]
//! This crate provides the core functionality of a Nexus, the secrets
//! custodian of a SPIFFE-authenticated deployment.
//!
//! The main entry point is the [`NexusServiceBuilder`]. It validates the
//! configuration, spawns the bootstrap/recovery engine as a background task,
//! and assembles the policy-gated `axum::Router`. The hosting application
//! mounts the router into its own server, provides the TLS/SPIFFE plumbing
//! via an implementation of [`nexus_types::api::PeerAuthenticator`], and
//! awaits the returned `JoinHandle` after cancelling the `CancellationToken`
//! to shut down gracefully.
//!
//! The bootstrap engine owns the lifecycle of the root key: on a fresh data
//! directory it generates one, distributes Shamir shards to every configured
//! Keeper and writes the bootstrap marker; on a restart it reconstructs the
//! key from any quorum of Keepers; in either case it then re-splits and
//! re-pushes periodically so replaced Keepers re-arm without operator action.
//! If the engine encounters a fatal condition it cancels the provided
//! `CancellationToken`, allowing the hosting application to exit loudly.
//!
//! Until the root key is live, every data route answers `503`; the operator
//! break-glass routes stay reachable because they are the way out of that
//! state.

use axum::Router;
use eyre::Context as _;
use nexus_types::api::PeerAuthService;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::api::cipher::CipherState;
use crate::api::operator::OperatorState;
use crate::api::policy::PolicyState;
use crate::api::secrets::SecretsState;
use crate::config::{BackendKind, NexusConfig};
use crate::services::backing_store::BackingStoreService;
use crate::services::bootstrap::{BootstrapTaskArgs, bootstrap_task};
use crate::services::keeper_client::KeeperClient;
use crate::services::policy_store::PolicyStore;
use crate::services::recovery::RecoveryService;
use crate::services::root_key_store::RootKeyStore;

pub(crate) mod api;
pub mod config;
pub mod metrics;
pub(crate) mod services;

pub use services::backing_store;
pub use services::keeper_client;
pub use services::policy_store;
pub use services::recovery;
pub use services::root_key_store;

/// [`NexusServiceBuilder`] assembles a Nexus: the bootstrap engine, the
/// service handles and the policy-gated router.
pub struct NexusServiceBuilder {
    router: Router,
    bootstrap: tokio::task::JoinHandle<eyre::Result<()>>,
    root_key_store: RootKeyStore,
}

impl NexusServiceBuilder {
    /// Initializes the Nexus service.
    ///
    /// This function sets up the components required for a Nexus to operate:
    ///
    /// 1. Validates the cross-field configuration invariants (fatal errors
    ///    surface here, before anything is spawned).
    /// 2. Ensures the data directory exists for the sealed backend.
    /// 3. Builds the Keeper RPC client, the root-key cell, the policy store
    ///    and the operator-recovery service.
    /// 4. Spawns the bootstrap/recovery engine; the engine cancels
    ///    `cancellation_token` when it fails fatally.
    /// 5. Assembles the router (health endpoints at the root, the v1 data
    ///    plane under `/v1`).
    ///
    /// The backing store is passed in rather than constructed so hosts and
    /// tests can wire their own implementation; use
    /// [`backing_store::from_config`] for the standard ones.
    pub async fn init(
        config: NexusConfig,
        backing_store: BackingStoreService,
        peer_auth: PeerAuthService,
        cancellation_token: CancellationToken,
    ) -> eyre::Result<Self> {
        config.validate()?;
        if matches!(config.backend, BackendKind::SealedPersistent) {
            tokio::fs::create_dir_all(&config.data_dir)
                .await
                .context("while creating the data directory")?;
        }

        tracing::info!("init keeper client..");
        let keeper_client =
            KeeperClient::new(config.rpc_timeout).context("while building the keeper client")?;
        let root_key_store = RootKeyStore::default();
        let policy_store = PolicyStore::default();
        let recovery = RecoveryService::new(
            config.shamir_shares,
            config.shamir_threshold,
            root_key_store.clone(),
            backing_store.clone(),
        );

        tracing::info!("spawning bootstrap engine..");
        let bootstrap = tokio::task::spawn(bootstrap_task(BootstrapTaskArgs {
            backend: config.backend,
            keeper_peers: config.keeper_peers.clone().unwrap_or_default(),
            shares: config.shamir_shares,
            threshold: config.shamir_threshold,
            data_dir: config.data_dir.clone(),
            recovery_poll_interval: config.recovery_poll_interval,
            resplit_interval: config.resplit_interval,
            max_backoff: config.max_backoff,
            keeper_client,
            root_key_store: root_key_store.clone(),
            backing_store: backing_store.clone(),
            cancellation_token: cancellation_token.clone(),
        }));

        let v1 = Router::new()
            .merge(api::secrets::routes(SecretsState {
                peer_auth: peer_auth.clone(),
                root_key_store: root_key_store.clone(),
                policy_store: policy_store.clone(),
                backing_store: backing_store.clone(),
            }))
            .merge(api::policy::routes(PolicyState {
                peer_auth: peer_auth.clone(),
                root_key_store: root_key_store.clone(),
                policy_store: policy_store.clone(),
                pilot_trust_domain: config.pilot_trust_domain.clone(),
            }))
            .merge(api::cipher::routes(CipherState {
                peer_auth: peer_auth.clone(),
                root_key_store: root_key_store.clone(),
                policy_store: policy_store.clone(),
                backing_store: backing_store.clone(),
                lite_workload_trust_domain: config.lite_workload_trust_domain.clone(),
                max_plaintext_size: config.max_plaintext_size,
                max_ciphertext_size: config.max_ciphertext_size,
            }))
            .merge(api::operator::routes(OperatorState {
                peer_auth,
                pilot_trust_domain: config.pilot_trust_domain.clone(),
                recovery,
            }));

        let router = Router::new()
            .merge(api::health::routes(root_key_store.clone()))
            .nest("/v1", v1)
            .fallback(unknown_route)
            .layer(TraceLayer::new_for_http());

        Ok(Self {
            router,
            bootstrap,
            root_key_store,
        })
    }

    /// A handle to the root-key cell, e.g. to guarantee zeroization at
    /// process exit with [`RootKeyStore::clear`].
    pub fn root_key_store(&self) -> RootKeyStore {
        self.root_key_store.clone()
    }

    /// Returns the assembled router and the bootstrap engine's join handle.
    ///
    /// Hosts should await the handle after cancelling the token so the
    /// engine finishes its current iteration before the process exits.
    pub fn build(self) -> (Router, tokio::task::JoinHandle<eyre::Result<()>>) {
        (self.router, self.bootstrap)
    }
}

async fn unknown_route() -> api::errors::ApiError {
    api::errors::ApiError::NotFound("unknown route".to_owned())
}
