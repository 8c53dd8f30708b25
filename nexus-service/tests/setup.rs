//! Shared fixtures for the service test suite: a header-based peer
//! authenticator, mock Keepers served from real localhost listeners, a
//! call-counting backing store, and a harness that boots a full Nexus
//! against them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use axum_test::TestServer;
use http::StatusCode;
use nexus_core::material::ShardSecret;
use nexus_core::sealing::SealingKey;
use nexus_service::NexusServiceBuilder;
use nexus_service::backing_store::memory::MemoryBackingStore;
use nexus_service::backing_store::{BackingStore, BackingStoreError, BackingStoreService};
use nexus_service::config::{BackendKind, KeeperPeers, NexusConfig};
use nexus_service::root_key_store::RootKeyStore;
use nexus_types::KeeperId;
use nexus_types::api::v1::{ContributeShardRequest, ContributeShardResponse, FetchShardResponse};
use nexus_types::api::{PeerAuthError, PeerAuthenticator};
use nexus_types::secret::{SecretMetadata, SecretPath, SecretVersionStamp};
use nexus_types::spiffe::{SpiffeId, TrustDomain};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Header the test authenticator reads the peer identity from.
pub const TEST_SPIFFE_HEADER: &str = "x-test-peer-spiffe-id";

/// Test identities.
pub const PILOT: &str = "spiffe://pilot.nexus.internal/recover";
pub const WORKLOAD: &str = "spiffe://nexus.internal/workload/web";
pub const OTHER_WORKLOAD: &str = "spiffe://nexus.internal/workload/batch";
pub const LITE_WORKLOAD: &str = "spiffe://lite.nexus.internal/app";

/// Reads the (test-verified) peer identity from [`TEST_SPIFFE_HEADER`].
pub struct TestPeerAuthenticator;

#[async_trait]
impl PeerAuthenticator for TestPeerAuthenticator {
    async fn authenticate(&self, headers: &http::HeaderMap) -> Result<SpiffeId, PeerAuthError> {
        let raw = headers
            .get(TEST_SPIFFE_HEADER)
            .ok_or_else(|| PeerAuthError::new("no peer identity on the request"))?
            .to_str()
            .map_err(|_| PeerAuthError::new("peer identity header is not valid UTF-8"))?;
        raw.parse()
            .map_err(|err| PeerAuthError::new(format!("invalid peer identity: {err}")))
    }
}

#[derive(Clone, Default)]
struct KeeperState {
    shard: Arc<parking_lot::Mutex<Option<ShardSecret>>>,
    reachable: Arc<AtomicBool>,
    contribute_calls: Arc<AtomicUsize>,
}

/// A Keeper stub speaking the two wire operations on a real socket.
pub struct MockKeeper {
    pub url: Url,
    state: KeeperState,
}

impl MockKeeper {
    pub async fn spawn() -> Self {
        let state = KeeperState {
            reachable: Arc::new(AtomicBool::new(true)),
            ..KeeperState::default()
        };
        let contribute_state = state.clone();
        let fetch_state = state.clone();
        let app = Router::new()
            .route(
                "/v1/store/contribute",
                post(move |Json(request): Json<ContributeShardRequest>| {
                    let state = contribute_state.clone();
                    async move {
                        if !state.reachable.load(Ordering::Relaxed) {
                            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                        }
                        state.contribute_calls.fetch_add(1, Ordering::Relaxed);
                        *state.shard.lock() = Some(request.shard);
                        Json(ContributeShardResponse::default()).into_response()
                    }
                }),
            )
            .route(
                "/v1/store/shard",
                post(move || {
                    let state = fetch_state.clone();
                    async move {
                        if !state.reachable.load(Ordering::Relaxed) {
                            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                        }
                        Json(FetchShardResponse {
                            shard: state.shard.lock().clone(),
                        })
                        .into_response()
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, state }
    }

    pub fn held_shard(&self) -> Option<ShardSecret> {
        self.state.shard.lock().clone()
    }

    pub fn clear_shard(&self) {
        *self.state.shard.lock() = None;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::Relaxed);
    }

    pub fn contribute_calls(&self) -> usize {
        self.state.contribute_calls.load(Ordering::Relaxed)
    }
}

/// Spawns `count` mock Keepers.
pub async fn spawn_keepers(count: usize) -> Vec<MockKeeper> {
    let mut keepers = Vec::with_capacity(count);
    for _ in 0..count {
        keepers.push(MockKeeper::spawn().await);
    }
    keepers
}

/// Wraps a store and counts every data operation that reaches it, so tests
/// can prove that denied requests never touch the store.
pub struct CountingBackingStore {
    inner: BackingStoreService,
    pub data_calls: Arc<AtomicUsize>,
}

impl CountingBackingStore {
    pub fn service(inner: BackingStoreService) -> (BackingStoreService, Arc<AtomicUsize>) {
        let data_calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(Self {
            inner,
            data_calls: data_calls.clone(),
        });
        (store, data_calls)
    }

    fn count(&self) {
        self.data_calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl BackingStore for CountingBackingStore {
    fn install_cipher(&self, sealing_key: SealingKey) {
        self.inner.install_cipher(sealing_key);
    }

    fn sealing_key(&self) -> Option<SealingKey> {
        self.inner.sealing_key()
    }

    async fn put(
        &self,
        path: &SecretPath,
        values: HashMap<String, String>,
    ) -> Result<u32, BackingStoreError> {
        self.count();
        self.inner.put(path, values).await
    }

    async fn get(
        &self,
        path: &SecretPath,
        version: u32,
    ) -> Result<HashMap<String, String>, BackingStoreError> {
        self.count();
        self.inner.get(path, version).await
    }

    async fn metadata(
        &self,
        path: &SecretPath,
    ) -> Result<(BTreeMap<u32, SecretVersionStamp>, SecretMetadata), BackingStoreError> {
        self.count();
        self.inner.metadata(path).await
    }

    async fn delete(&self, path: &SecretPath, versions: &[u32]) -> Result<(), BackingStoreError> {
        self.count();
        self.inner.delete(path, versions).await
    }

    async fn undelete(
        &self,
        path: &SecretPath,
        versions: &[u32],
    ) -> Result<(), BackingStoreError> {
        self.count();
        self.inner.undelete(path, versions).await
    }

    async fn list(&self) -> Result<Vec<String>, BackingStoreError> {
        self.count();
        self.inner.list().await
    }
}

/// A booted Nexus under test.
pub struct TestNexus {
    pub server: TestServer,
    pub root_key_store: RootKeyStore,
    pub cancellation_token: CancellationToken,
    pub bootstrap: tokio::task::JoinHandle<eyre::Result<()>>,
}

impl TestNexus {
    /// Cancels the engine and waits for it to wind down.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        let _ = self.bootstrap.await;
    }
}

/// A sealed-backend configuration with test-friendly intervals.
pub fn test_config(data_dir: &Path, keepers: &[MockKeeper]) -> NexusConfig {
    NexusConfig {
        backend: BackendKind::SealedPersistent,
        data_dir: PathBuf::from(data_dir),
        shamir_shares: 3,
        shamir_threshold: 2,
        max_secret_versions: 10,
        resplit_interval: Duration::from_millis(200),
        rpc_timeout: Duration::from_secs(2),
        recovery_poll_interval: Duration::from_millis(50),
        max_backoff: Duration::from_millis(100),
        keeper_peers: Some(keeper_peers(keepers)),
        trust_domain: trust_domain("nexus.internal"),
        keeper_trust_domain: trust_domain("keeper.nexus.internal"),
        pilot_trust_domain: trust_domain("pilot.nexus.internal"),
        lite_workload_trust_domain: trust_domain("lite.nexus.internal"),
        max_plaintext_size: 1024 * 1024,
        max_ciphertext_size: 1024 * 1024 + 29,
    }
}

pub fn keeper_peers(keepers: &[MockKeeper]) -> KeeperPeers {
    keepers
        .iter()
        .enumerate()
        .map(|(i, keeper)| (KeeperId::new(format!("k{}", i + 1)), keeper.url.clone()))
        .collect()
}

fn trust_domain(name: &str) -> TrustDomain {
    TrustDomain::new(name).unwrap()
}

/// Boots a Nexus with the provided store.
pub async fn start_nexus_with_store(
    config: NexusConfig,
    store: BackingStoreService,
) -> TestNexus {
    let cancellation_token = CancellationToken::new();
    let builder = NexusServiceBuilder::init(
        config,
        store,
        Arc::new(TestPeerAuthenticator),
        cancellation_token.clone(),
    )
    .await
    .expect("service init");
    let root_key_store = builder.root_key_store();
    let (router, bootstrap) = builder.build();
    TestNexus {
        server: TestServer::new(router).expect("test server"),
        root_key_store,
        cancellation_token,
        bootstrap,
    }
}

/// Boots a Nexus with the standard backend for `config`.
pub async fn start_nexus(config: NexusConfig) -> TestNexus {
    let store = nexus_service::backing_store::from_config(&config)
        .await
        .expect("backing store");
    start_nexus_with_store(config, store).await
}

/// Boots an in-memory Nexus (no Keepers involved).
pub async fn start_memory_nexus() -> TestNexus {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &[]);
    config.backend = BackendKind::Memory;
    config.keeper_peers = None;
    let store = MemoryBackingStore::service(config.max_secret_versions);
    start_nexus_with_store(config, store).await
}

/// Polls `/ready` until it answers 200 or the deadline passes.
pub async fn wait_for_ready(nexus: &TestNexus) {
    for _ in 0..200 {
        if nexus.server.get("/ready").await.status_code() == StatusCode::OK {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("nexus did not become ready in time");
}

/// Polls until `condition` holds or the deadline passes.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}
