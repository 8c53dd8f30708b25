//! The per-request authorization pipeline.
//!
//! Order matters and is the same for every route:
//!
//! 1. authenticate the peer (verified SPIFFE ID or `401`),
//! 2. not-ready gate (root-key cell empty → `503`; the operator routes skip
//!    this step, they are the way out of that state),
//! 3. class or policy check (`401`),
//! 4. input validation (done by the individual handlers, `400`).

use http::HeaderMap;
use nexus_types::api::PeerAuthService;
use nexus_types::policy::Permission;
use nexus_types::spiffe::{SpiffeId, TrustDomain};

use super::errors::ApiError;
use crate::services::policy_store::PolicyStore;
use crate::services::root_key_store::RootKeyStore;

pub(crate) async fn authenticate(
    peer_auth: &PeerAuthService,
    headers: &HeaderMap,
) -> Result<SpiffeId, ApiError> {
    Ok(peer_auth.authenticate(headers).await?)
}

pub(crate) fn require_ready(root_key_store: &RootKeyStore) -> Result<(), ApiError> {
    if root_key_store.is_empty() {
        Err(ApiError::NotReady)
    } else {
        Ok(())
    }
}

pub(crate) fn require_policy(
    policy_store: &PolicyStore,
    peer: &SpiffeId,
    path: &str,
    required: &[Permission],
) -> Result<(), ApiError> {
    if policy_store.allows(peer, path, required) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized(format!(
            "no policy grants {required:?} on {path:?} to {peer}"
        )))
    }
}

pub(crate) fn require_trust_domain(
    peer: &SpiffeId,
    trust_domain: &TrustDomain,
    class: &str,
) -> Result<(), ApiError> {
    if peer.member_of(trust_domain) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized(format!("peer {peer} is not a {class}")))
    }
}
