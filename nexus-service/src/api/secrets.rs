//! The versioned secret routes.
//!
//! `POST /v1/store/secrets?action=default|get|delete|undelete|list` and
//! `POST /v1/store/secrets/metadata?action=get`. Required permissions per
//! action: put/delete/undelete need `write`, get and metadata need `read`,
//! list needs `list`. The list operation has no target path; it authorizes
//! against the empty path, so a policy whose path pattern matches `""`
//! (e.g. `.*`) grants it.

use axum::body::Bytes;
use axum::extract::Query;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::HeaderMap;
use nexus_types::api::PeerAuthService;
use nexus_types::api::v1::{
    Action, ActionQuery, SecretGetRequest, SecretGetResponse, SecretListResponse,
    SecretMetadataRequest, SecretMetadataResponse, SecretPutRequest, SecretPutResponse,
    SecretVersionsRequest, SecretVersionsResponse,
};
use nexus_types::policy::Permission;
use nexus_types::secret::validate_key_name;
use tracing::instrument;

use super::errors::ApiError;
use super::{auth, parse_json};
use crate::services::backing_store::BackingStoreService;
use crate::services::policy_store::PolicyStore;
use crate::services::root_key_store::RootKeyStore;

/// Shared handles of the secret routes.
#[derive(Clone)]
pub(crate) struct SecretsState {
    pub(crate) peer_auth: PeerAuthService,
    pub(crate) root_key_store: RootKeyStore,
    pub(crate) policy_store: PolicyStore,
    pub(crate) backing_store: BackingStoreService,
}

/// Creates a router with the secret routes.
pub(crate) fn routes(state: SecretsState) -> Router {
    let metadata_state = state.clone();
    Router::new()
        .route(
            "/store/secrets",
            post(move |headers: HeaderMap, Query(query): Query<ActionQuery>, body: Bytes| {
                secrets(state, headers, query.action, body)
            }),
        )
        .route(
            "/store/secrets/metadata",
            post(move |headers: HeaderMap, Query(query): Query<ActionQuery>, body: Bytes| {
                metadata(metadata_state, headers, query.action, body)
            }),
        )
}

#[instrument(level = "debug", skip_all, fields(action = ?action))]
async fn secrets(
    state: SecretsState,
    headers: HeaderMap,
    action: Action,
    body: Bytes,
) -> Result<Response, ApiError> {
    let peer = auth::authenticate(&state.peer_auth, &headers).await?;
    auth::require_ready(&state.root_key_store)?;
    match action {
        Action::Default => {
            let request: SecretPutRequest = parse_json(&body)?;
            for key in request.values.keys() {
                validate_key_name(key)
                    .map_err(|err| ApiError::BadRequest(format!("invalid key name: {err}")))?;
            }
            auth::require_policy(
                &state.policy_store,
                &peer,
                request.path.as_str(),
                &[Permission::Write],
            )?;
            let version = state.backing_store.put(&request.path, request.values).await?;
            Ok(Json(SecretPutResponse { version }).into_response())
        }
        Action::Get => {
            let request: SecretGetRequest = parse_json(&body)?;
            auth::require_policy(
                &state.policy_store,
                &peer,
                request.path.as_str(),
                &[Permission::Read],
            )?;
            let data = state.backing_store.get(&request.path, request.version).await?;
            Ok(Json(SecretGetResponse { data }).into_response())
        }
        Action::Delete => {
            let request: SecretVersionsRequest = parse_json(&body)?;
            auth::require_policy(
                &state.policy_store,
                &peer,
                request.path.as_str(),
                &[Permission::Write],
            )?;
            state
                .backing_store
                .delete(&request.path, &request.versions)
                .await?;
            Ok(Json(SecretVersionsResponse::default()).into_response())
        }
        Action::Undelete => {
            let request: SecretVersionsRequest = parse_json(&body)?;
            auth::require_policy(
                &state.policy_store,
                &peer,
                request.path.as_str(),
                &[Permission::Write],
            )?;
            state
                .backing_store
                .undelete(&request.path, &request.versions)
                .await?;
            Ok(Json(SecretVersionsResponse::default()).into_response())
        }
        Action::List => {
            auth::require_policy(&state.policy_store, &peer, "", &[Permission::List])?;
            let keys = state.backing_store.list().await?;
            Ok(Json(SecretListResponse { keys }).into_response())
        }
    }
}

#[instrument(level = "debug", skip_all)]
async fn metadata(
    state: SecretsState,
    headers: HeaderMap,
    action: Action,
    body: Bytes,
) -> Result<Response, ApiError> {
    let peer = auth::authenticate(&state.peer_auth, &headers).await?;
    auth::require_ready(&state.root_key_store)?;
    if action != Action::Get {
        return Err(ApiError::BadRequest(
            "metadata route only supports action=get".to_owned(),
        ));
    }
    let request: SecretMetadataRequest = parse_json(&body)?;
    auth::require_policy(
        &state.policy_store,
        &peer,
        request.path.as_str(),
        &[Permission::Read],
    )?;
    let (versions, metadata) = state.backing_store.metadata(&request.path).await?;
    Ok(Json(SecretMetadataResponse { versions, metadata }).into_response())
}
