//! Example Nexus host binary.
//!
//! Wires the service library into an axum server: config from environment
//! variables, the standard backing store, a header-based peer authenticator
//! for deployments behind a SPIFFE-terminating front end, and graceful
//! shutdown on ctrl-c. Exits nonzero only on fatal initialization errors
//! (missing Keeper table, insufficient Keepers, self-check failure,
//! marker-write failure).

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use eyre::Context as _;
use nexus_service::{NexusServiceBuilder, backing_store, config::NexusConfig, metrics};
use nexus_types::api::{PeerAuthError, PeerAuthenticator};
use nexus_types::spiffe::SpiffeId;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Header carrying the verified peer SPIFFE ID.
///
/// In this example the mTLS termination happens in front of the service
/// (envoy, ghostunnel, ...); whatever terminates is trusted to overwrite
/// this header with the identity it verified.
const SPIFFE_ID_HEADER: &str = "x-nexus-peer-spiffe-id";

/// The configuration for the example Nexus host.
#[derive(Parser, Debug)]
struct ExampleNexusConfig {
    /// The bind addr of the axum server.
    #[clap(long, env = "NEXUS_BIND_ADDR", default_value = "127.0.0.1:8553")]
    bind_addr: SocketAddr,

    /// Max wait time for background tasks during shutdown.
    #[clap(
        long,
        env = "NEXUS_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    max_wait_time_shutdown: Duration,

    /// The Nexus service config.
    #[clap(flatten)]
    service_config: NexusConfig,
}

/// Reads the verified peer identity from [`SPIFFE_ID_HEADER`].
struct HeaderPeerAuthenticator;

#[async_trait]
impl PeerAuthenticator for HeaderPeerAuthenticator {
    async fn authenticate(&self, headers: &http::HeaderMap) -> Result<SpiffeId, PeerAuthError> {
        let raw = headers
            .get(SPIFFE_ID_HEADER)
            .ok_or_else(|| PeerAuthError::new("no peer identity on the request"))?
            .to_str()
            .map_err(|_| PeerAuthError::new("peer identity header is not valid UTF-8"))?;
        raw.parse()
            .map_err(|err| PeerAuthError::new(format!("invalid peer identity: {err}")))
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nexus_service=info,info")),
        )
        .init();
    metrics::describe_metrics();

    let config = ExampleNexusConfig::parse();
    tracing::info!("starting nexus with config: {config:#?}");

    let result = start_service(config).await;
    match result {
        Ok(()) => {
            tracing::info!("good night!");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn start_service(config: ExampleNexusConfig) -> eyre::Result<()> {
    let cancellation_token = CancellationToken::new();

    tracing::info!("init backing store..");
    let store = backing_store::from_config(&config.service_config)
        .await
        .context("while building the backing store")?;

    tracing::info!("init nexus service..");
    let builder = NexusServiceBuilder::init(
        config.service_config,
        store,
        Arc::new(HeaderPeerAuthenticator),
        cancellation_token.clone(),
    )
    .await?;
    let root_key_store = builder.root_key_store();
    let (router, bootstrap) = builder.build();

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("while binding the listener")?;
    tracing::info!(
        "serving on {}",
        listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "invalid addr".to_owned())
    );

    let axum_cancel_token = cancellation_token.clone();
    let server = tokio::spawn(async move {
        let shutdown = axum_cancel_token.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(err) = result {
            tracing::error!("got error from axum: {err:?}");
        }
        // cancel in case axum stopped on its own so the engine follows
        axum_cancel_token.cancel();
    });

    let signal_token = cancellation_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down..");
            signal_token.cancel();
        }
    });

    cancellation_token.cancelled().await;

    tracing::info!(
        "waiting for shutdown of services (max wait time {:?})..",
        config.max_wait_time_shutdown
    );
    let engine_result =
        match tokio::time::timeout(config.max_wait_time_shutdown, async move {
            let (_, engine) = tokio::join!(server, bootstrap);
            engine
        })
        .await
        {
            Ok(engine) => engine.context("bootstrap engine panicked")?,
            Err(_) => {
                tracing::warn!("could not finish shutdown in time");
                Ok(())
            }
        };

    // guaranteed zeroization of the root key at process exit
    root_key_store.clear();
    engine_result
}
