//! JSON RPC client for Keeper peers.
//!
//! A thin, stateless façade over a shared `reqwest` client. The transport is
//! expected to be mTLS with the Keeper trust domain verified by the TLS
//! layer (a collaborator of this library); this module only speaks the two
//! wire operations:
//!
//! - `POST <keeper>/v1/store/contribute` – push one shard,
//! - `POST <keeper>/v1/store/shard` – pull whatever shard the Keeper holds.
//!
//! The client never retries: connection failures, timeouts, 5xx and
//! malformed bodies are all surfaced to the bootstrap engine, which owns the
//! retry/backoff discipline.

use std::time::Duration;

use nexus_core::material::ShardSecret;
use nexus_types::KeeperId;
use nexus_types::api::v1::{ContributeShardRequest, FetchShardRequest, FetchShardResponse};
use reqwest::StatusCode;
use tracing::instrument;
use url::Url;

/// Errors of the Keeper RPCs. All of them are transient from the caller's
/// perspective and worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum KeeperClientError {
    /// Connection, DNS or timeout failure.
    #[error("transport error talking to keeper: {0}")]
    Transport(#[from] reqwest::Error),
    /// The Keeper answered with a non-success status.
    #[error("keeper answered {status}: {body:?}")]
    Status {
        /// The HTTP status code.
        status: StatusCode,
        /// The (truncated) response body.
        body: String,
    },
    /// The Keeper answered 2xx with a body that does not parse.
    #[error("keeper answered a malformed body: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

/// Stateless Keeper RPC client.
#[derive(Clone)]
pub struct KeeperClient {
    http: reqwest::Client,
}

impl KeeperClient {
    /// Builds the client with the per-RPC `timeout` applied to every call.
    pub fn new(timeout: Duration) -> eyre::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Pushes `shard` to the Keeper at `base_url`.
    ///
    /// Any 2xx is an ack; the body is ignored (Keepers may answer `{}` or
    /// nothing at all). Re-sending the same shard is a no-op on the Keeper
    /// side, so callers retry freely.
    #[instrument(level = "debug", skip_all, fields(keeper = %keeper_id))]
    pub async fn contribute(
        &self,
        keeper_id: &KeeperId,
        base_url: &Url,
        shard: &ShardSecret,
    ) -> Result<(), KeeperClientError> {
        let request = ContributeShardRequest {
            keeper_id: keeper_id.clone(),
            shard: shard.clone(),
        };
        let response = self
            .http
            .post(endpoint(base_url, "v1/store/contribute"))
            .json(&request)
            .send()
            .await?;
        if response.status().is_success() {
            tracing::debug!("keeper acked shard");
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    /// Asks the Keeper at `base_url` for the shard it holds.
    ///
    /// Returns `Ok(None)` when the Keeper holds no shard yet: an empty body,
    /// a body without a `shard` field and a 404-class answer all mean that.
    #[instrument(level = "debug", skip_all, fields(keeper = %keeper_id))]
    pub async fn fetch_shard(
        &self,
        keeper_id: &KeeperId,
        base_url: &Url,
    ) -> Result<Option<ShardSecret>, KeeperClientError> {
        let response = self
            .http
            .post(endpoint(base_url, "v1/store/shard"))
            .json(&FetchShardRequest::default())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        let parsed: FetchShardResponse = serde_json::from_slice(&body)?;
        Ok(parsed.shard)
    }
}

fn endpoint(base_url: &Url, path: &str) -> String {
    format!("{}/{path}", base_url.as_str().trim_end_matches('/'))
}

async fn status_error(response: reqwest::Response) -> KeeperClientError {
    let status = response.status();
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(256)
        .collect();
    KeeperClientError::Status { status, body }
}
