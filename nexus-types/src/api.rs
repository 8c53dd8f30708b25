//! # API module
//!
//! Entry point for all API version modules; exposes the version 1 types
//! under [`v1`] and the peer-authentication seam shared by every route.

use std::sync::Arc;

use async_trait::async_trait;

use crate::spiffe::SpiffeId;

pub mod v1;

/// Error returned when a peer cannot be authenticated.
#[derive(Debug, thiserror::Error)]
#[error("peer authentication failed: {0}")]
pub struct PeerAuthError(String);

impl PeerAuthError {
    /// Creates a new authentication error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The seam between the router and the SPIFFE workload API.
///
/// Real deployments terminate mTLS outside this library; whatever does so is
/// expected to hand over the verified peer identity, and an implementation of
/// this trait extracts it from the request head. Anything that fails here is
/// answered with `401` before a handler runs.
#[async_trait]
pub trait PeerAuthenticator {
    /// Extracts and verifies the peer identity of a request.
    async fn authenticate(&self, headers: &http::HeaderMap) -> Result<SpiffeId, PeerAuthError>;
}

/// Dynamic trait object for the peer authenticator.
///
/// Must be `Send + Sync` to work with async contexts (e.g., Axum).
pub type PeerAuthService = Arc<dyn PeerAuthenticator + Send + Sync>;
