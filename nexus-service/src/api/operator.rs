//! Operator break-glass routes.
//!
//! `POST /v1/operator/recover` exports the shard set of the live root key;
//! `POST /v1/operator/restore` imports shards one call at a time. Both are
//! restricted to the Pilot trust domain and both bypass the not-ready gate:
//! restore is precisely how an operator brings a Nexus back when too few
//! Keepers survived.

use axum::body::Bytes;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::HeaderMap;
use nexus_core::material::KeyShard;
use nexus_types::api::PeerAuthService;
use nexus_types::api::v1::{OperatorShard, RecoverResponse, RestoreRequest, RestoreResponse};
use nexus_types::spiffe::TrustDomain;
use tracing::instrument;

use super::errors::ApiError;
use super::{auth, parse_json};
use crate::services::recovery::RecoveryService;

/// Shared handles of the operator routes.
#[derive(Clone)]
pub(crate) struct OperatorState {
    pub(crate) peer_auth: PeerAuthService,
    pub(crate) pilot_trust_domain: TrustDomain,
    pub(crate) recovery: RecoveryService,
}

/// Creates a router with the break-glass routes.
pub(crate) fn routes(state: OperatorState) -> Router {
    let restore_state = state.clone();
    Router::new()
        .route(
            "/operator/recover",
            post(move |headers: HeaderMap| recover(state, headers)),
        )
        .route(
            "/operator/restore",
            post(move |headers: HeaderMap, body: Bytes| restore(restore_state, headers, body)),
        )
}

#[instrument(level = "debug", skip_all)]
async fn recover(state: OperatorState, headers: HeaderMap) -> Result<Response, ApiError> {
    let peer = auth::authenticate(&state.peer_auth, &headers).await?;
    auth::require_trust_domain(&peer, &state.pilot_trust_domain, "pilot")?;
    let (shards, threshold) = state.recovery.export()?;
    tracing::info!("exported {} recovery shards to {peer}", shards.len());
    Ok(Json(RecoverResponse {
        shards: shards
            .iter()
            .map(|shard| OperatorShard {
                id: shard.index,
                shard: shard.secret.clone(),
            })
            .collect(),
        threshold,
    })
    .into_response())
}

#[instrument(level = "debug", skip_all)]
async fn restore(
    state: OperatorState,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let peer = auth::authenticate(&state.peer_auth, &headers).await?;
    auth::require_trust_domain(&peer, &state.pilot_trust_domain, "pilot")?;
    let request: RestoreRequest = parse_json(&body)?;
    let status = state.recovery.restore(KeyShard {
        index: request.id,
        secret: request.shard,
    })?;
    Ok(Json(RestoreResponse {
        collected: status.collected,
        threshold: status.threshold,
        restored: status.restored,
    })
    .into_response())
}
