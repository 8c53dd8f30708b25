//! Health Check Endpoints
//!
//! - `/health` – liveness, always `200 OK` once the server accepts requests.
//! - `/ready` – readiness; `503` until the root-key cell is filled.
//!
//! The endpoints include a `Cache-Control: no-cache` header to prevent
//! caching of responses.

use axum::{
    Router,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::services::root_key_store::RootKeyStore;

/// Create a router containing the health endpoints.
///
/// All endpoints have `Cache-Control: no-cache` set.
pub(crate) fn routes(root_key_store: RootKeyStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(move || ready(root_key_store)))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}

/// Returns `200 OK` once the root key is live, `503` before that.
async fn ready(root_key_store: RootKeyStore) -> impl IntoResponse {
    if root_key_store.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    } else {
        (StatusCode::OK, "ready")
    }
}
