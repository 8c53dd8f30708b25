//! Policy administration routes.
//!
//! `POST /v1/acl/policy?action=default|get|delete|list`, all gated on the
//! `super` permission against the `acl/policy` target path. Peers in the
//! Pilot trust domain pass without a policy lookup: the very first policy
//! has to come from somewhere, and that somewhere is the operator.

use axum::body::Bytes;
use axum::extract::Query;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::HeaderMap;
use nexus_types::api::PeerAuthService;
use nexus_types::api::v1::{
    Action, ActionQuery, PolicyByIdRequest, PolicyCreateRequest, PolicyCreateResponse,
    PolicyDeleteResponse, PolicyGetResponse, PolicyListResponse,
};
use nexus_types::policy::Permission;
use nexus_types::spiffe::TrustDomain;
use tracing::instrument;

use super::errors::ApiError;
use super::{auth, parse_json};
use crate::services::policy_store::PolicyStore;
use crate::services::root_key_store::RootKeyStore;

/// The target path policy administration authorizes against.
const POLICY_ADMIN_PATH: &str = "acl/policy";

/// Shared handles of the policy routes.
#[derive(Clone)]
pub(crate) struct PolicyState {
    pub(crate) peer_auth: PeerAuthService,
    pub(crate) root_key_store: RootKeyStore,
    pub(crate) policy_store: PolicyStore,
    pub(crate) pilot_trust_domain: TrustDomain,
}

/// Creates a router with the policy administration route.
pub(crate) fn routes(state: PolicyState) -> Router {
    Router::new().route(
        "/acl/policy",
        post(move |headers: HeaderMap, Query(query): Query<ActionQuery>, body: Bytes| {
            policy(state, headers, query.action, body)
        }),
    )
}

#[instrument(level = "debug", skip_all, fields(action = ?action))]
async fn policy(
    state: PolicyState,
    headers: HeaderMap,
    action: Action,
    body: Bytes,
) -> Result<Response, ApiError> {
    let peer = auth::authenticate(&state.peer_auth, &headers).await?;
    auth::require_ready(&state.root_key_store)?;
    if !peer.member_of(&state.pilot_trust_domain) {
        auth::require_policy(
            &state.policy_store,
            &peer,
            POLICY_ADMIN_PATH,
            &[Permission::Super],
        )?;
    }
    match action {
        Action::Default => {
            let request: PolicyCreateRequest = parse_json(&body)?;
            let policy = state.policy_store.create(
                request.name,
                request.spiffe_id_pattern,
                request.path_pattern,
                request.permissions,
                peer,
            )?;
            Ok(Json(PolicyCreateResponse { id: policy.id }).into_response())
        }
        Action::Get => {
            let request: PolicyByIdRequest = parse_json(&body)?;
            let policy = state.policy_store.get(request.id)?;
            Ok(Json(PolicyGetResponse { policy }).into_response())
        }
        Action::Delete => {
            let request: PolicyByIdRequest = parse_json(&body)?;
            state.policy_store.delete(request.id)?;
            Ok(Json(PolicyDeleteResponse::default()).into_response())
        }
        Action::List => {
            Ok(Json(PolicyListResponse {
                policies: state.policy_store.list(),
            })
            .into_response())
        }
        Action::Undelete => Err(ApiError::BadRequest(
            "policy route does not support action=undelete".to_owned(),
        )),
    }
}
