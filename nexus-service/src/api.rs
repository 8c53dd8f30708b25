//! API module for the Nexus service.
//!
//! This module defines all HTTP endpoints a Nexus serves and organizes them
//! into submodules:
//!
//! - [`errors`] – API error type and conversions from internal service errors.
//! - [`auth`] – the per-request authorization pipeline.
//! - [`health`] – health endpoints (`/health`, `/ready`).
//! - [`secrets`] – the versioned secret routes (`/v1/store/secrets[...]`).
//! - [`policy`] – policy administration (`/v1/acl/policy`).
//! - [`cipher`] – encryption as a service (`/v1/cipher/encrypt|decrypt`).
//! - [`operator`] – break-glass recovery (`/v1/operator/recover|restore`).
//!
//! Every data route is `POST`; multi-operation routes dispatch on the
//! `action` query parameter. Handlers read the raw body and parse it per
//! action, so a request is authenticated and gated before its body shape is
//! even considered.

use serde::de::DeserializeOwned;

use self::errors::ApiError;

pub(crate) mod auth;
pub(crate) mod cipher;
pub(crate) mod errors;
pub(crate) mod health;
pub(crate) mod operator;
pub(crate) mod policy;
pub(crate) mod secrets;

pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("invalid request body: {err}")))
}
