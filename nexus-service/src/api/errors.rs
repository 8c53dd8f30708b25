//! This module defines the [`ApiError`] a route handler may produce and maps
//! it onto the wire: authorization failures are `401`, the not-ready gate is
//! `503`, caller mistakes are `400`/`404`, and everything the caller cannot
//! fix is a `500` whose detail stays in the log rather than the response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use nexus_core::sealing::SealingError;
use nexus_types::api::PeerAuthError;
use nexus_types::secret::VersionLookupError;

use crate::metrics::METRICS_ID_REQUESTS_DENIED;
use crate::services::backing_store::BackingStoreError;
use crate::services::policy_store::PolicyStoreError;
use crate::services::recovery::RecoveryError;

/// All errors a route handler may answer with.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("not ready")]
    NotReady,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal error")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(message) => {
                ::metrics::counter!(METRICS_ID_REQUESTS_DENIED).increment(1);
                tracing::debug!("denied: {message}");
                (StatusCode::UNAUTHORIZED, message)
            }
            ApiError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not ready".to_owned()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(detail) => {
                tracing::error!("internal error answering a request: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<PeerAuthError> for ApiError {
    fn from(value: PeerAuthError) -> Self {
        Self::Unauthorized(value.to_string())
    }
}

impl From<BackingStoreError> for ApiError {
    fn from(value: BackingStoreError) -> Self {
        match value {
            BackingStoreError::UnknownPath(path) => {
                Self::NotFound(format!("unknown secret path: {path}"))
            }
            BackingStoreError::Version(VersionLookupError::NotFound(version)) => {
                Self::NotFound(format!("version {version} not found"))
            }
            BackingStoreError::Version(VersionLookupError::Deleted(version)) => {
                Self::NotFound(format!("version {version} is deleted"))
            }
            BackingStoreError::NotReady => Self::NotReady,
            BackingStoreError::Corrupt(detail) => Self::Internal(detail),
            BackingStoreError::Database(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<SealingError> for ApiError {
    fn from(value: SealingError) -> Self {
        match value {
            SealingError::ShortRecord(_)
            | SealingError::UnknownVersion(_)
            | SealingError::OpenFailed => Self::BadRequest(value.to_string()),
            SealingError::SealFailed => Self::Internal(value.to_string()),
        }
    }
}

impl From<PolicyStoreError> for ApiError {
    fn from(value: PolicyStoreError) -> Self {
        match value {
            PolicyStoreError::UnknownPolicy(id) => Self::NotFound(format!("unknown policy: {id}")),
            PolicyStoreError::Compile(err) => Self::BadRequest(err.to_string()),
        }
    }
}

impl From<RecoveryError> for ApiError {
    fn from(value: RecoveryError) -> Self {
        match value {
            RecoveryError::NothingToExport
            | RecoveryError::Shamir(_)
            | RecoveryError::Conflict => Self::BadRequest(value.to_string()),
        }
    }
}
