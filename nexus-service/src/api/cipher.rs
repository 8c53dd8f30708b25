//! Encryption as a service.
//!
//! `POST /v1/cipher/encrypt` and `POST /v1/cipher/decrypt`, both stateless
//! over the store's AEAD. Two wire shapes, selected by `Content-Type`:
//!
//! - `application/octet-stream`: encrypt takes raw plaintext and answers the
//!   `version | nonce | ciphertext` layout; decrypt takes that layout and
//!   answers raw plaintext.
//! - anything else is JSON with base64 fields, mirrored in the response.
//!
//! Lite workloads (members of the configured lite trust domain) may call
//! these routes without any policy; everyone else needs a policy granting
//! `execute` on the route path (`cipher/encrypt` / `cipher/decrypt`).

use axum::body::Bytes;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::{HeaderMap, header};
use nexus_core::sealing::{NONCE_LEN, SEALING_VERSION, SealedBlob};
use nexus_types::api::PeerAuthService;
use nexus_types::api::v1::{DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse};
use nexus_types::policy::Permission;
use nexus_types::spiffe::{SpiffeId, TrustDomain};
use tracing::instrument;

use super::errors::ApiError;
use super::{auth, parse_json};
use crate::metrics::{METRICS_ID_CIPHER_DECRYPT, METRICS_ID_CIPHER_ENCRYPT};
use crate::services::backing_store::BackingStoreService;
use crate::services::policy_store::PolicyStore;
use crate::services::root_key_store::RootKeyStore;

/// Shared handles of the cipher routes.
#[derive(Clone)]
pub(crate) struct CipherState {
    pub(crate) peer_auth: PeerAuthService,
    pub(crate) root_key_store: RootKeyStore,
    pub(crate) policy_store: PolicyStore,
    pub(crate) backing_store: BackingStoreService,
    pub(crate) lite_workload_trust_domain: TrustDomain,
    pub(crate) max_plaintext_size: usize,
    pub(crate) max_ciphertext_size: usize,
}

/// Creates a router with the encrypt/decrypt routes.
pub(crate) fn routes(state: CipherState) -> Router {
    let decrypt_state = state.clone();
    Router::new()
        .route(
            "/cipher/encrypt",
            post(move |headers: HeaderMap, body: Bytes| encrypt(state, headers, body)),
        )
        .route(
            "/cipher/decrypt",
            post(move |headers: HeaderMap, body: Bytes| decrypt(decrypt_state, headers, body)),
        )
}

#[instrument(level = "debug", skip_all)]
async fn encrypt(state: CipherState, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    let peer = auth::authenticate(&state.peer_auth, &headers).await?;
    auth::require_ready(&state.root_key_store)?;
    authorize(&state, &peer, "cipher/encrypt")?;
    let sealing_key = state.backing_store.sealing_key().ok_or(ApiError::NotReady)?;
    ::metrics::counter!(METRICS_ID_CIPHER_ENCRYPT).increment(1);

    if is_octet_stream(&headers) {
        cap(body.len(), state.max_plaintext_size, "plaintext")?;
        let blob = sealing_key.seal(&body)?;
        Ok(octet_response(blob.to_bytes()))
    } else {
        let request: EncryptRequest = parse_json(&body)?;
        let plaintext = decode_base64("plaintext", &request.plaintext)?;
        cap(plaintext.len(), state.max_plaintext_size, "plaintext")?;
        let blob = sealing_key.seal(&plaintext)?;
        Ok(Json(EncryptResponse {
            version: version_string(),
            nonce: BASE64.encode(blob.nonce),
            ciphertext: BASE64.encode(&blob.ciphertext),
        })
        .into_response())
    }
}

#[instrument(level = "debug", skip_all)]
async fn decrypt(state: CipherState, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    let peer = auth::authenticate(&state.peer_auth, &headers).await?;
    auth::require_ready(&state.root_key_store)?;
    authorize(&state, &peer, "cipher/decrypt")?;
    let sealing_key = state.backing_store.sealing_key().ok_or(ApiError::NotReady)?;
    ::metrics::counter!(METRICS_ID_CIPHER_DECRYPT).increment(1);

    if is_octet_stream(&headers) {
        cap(body.len(), state.max_ciphertext_size, "ciphertext")?;
        let blob = SealedBlob::from_bytes(&body)?;
        let plaintext = sealing_key.open(&blob)?;
        Ok(octet_response(plaintext))
    } else {
        let request: DecryptRequest = parse_json(&body)?;
        if request.version != version_string() {
            return Err(ApiError::BadRequest(format!(
                "unknown sealing version {:?}",
                request.version
            )));
        }
        let nonce_bytes = decode_base64("nonce", &request.nonce)?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| ApiError::BadRequest("nonce must be exactly 12 bytes".to_owned()))?;
        let ciphertext = decode_base64("ciphertext", &request.ciphertext)?;
        // cap the full sealed record, matching the octet-stream accounting
        cap(
            1 + nonce.len() + ciphertext.len(),
            state.max_ciphertext_size,
            "ciphertext",
        )?;
        let blob = SealedBlob {
            version: SEALING_VERSION,
            nonce,
            ciphertext,
        };
        let plaintext = sealing_key.open(&blob)?;
        Ok(Json(DecryptResponse {
            plaintext: BASE64.encode(&plaintext),
        })
        .into_response())
    }
}

fn authorize(state: &CipherState, peer: &SpiffeId, route_path: &str) -> Result<(), ApiError> {
    if peer.member_of(&state.lite_workload_trust_domain) {
        return Ok(());
    }
    auth::require_policy(&state.policy_store, peer, route_path, &[Permission::Execute])
}

fn is_octet_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/octet-stream"))
}

fn octet_response(bytes: Vec<u8>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response()
}

fn version_string() -> String {
    (SEALING_VERSION as char).to_string()
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    BASE64
        .decode(value)
        .map_err(|err| ApiError::BadRequest(format!("invalid base64 in {field}: {err}")))
}

fn cap(len: usize, max: usize, what: &str) -> Result<(), ApiError> {
    if len > max {
        Err(ApiError::BadRequest(format!(
            "{what} too large: {len} bytes (cap {max})"
        )))
    } else {
        Ok(())
    }
}
