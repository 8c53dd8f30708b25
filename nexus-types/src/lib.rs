#![deny(missing_docs)]
//! Shared domain and wire types for the Nexus secrets custodian.
//!
//! Everything two or more Nexus crates (or a Keeper/Pilot counterpart
//! implementation) need to agree on lives here: SPIFFE identities and trust
//! domains, the versioned secret entity with its metadata discipline, access
//! policies, and the version 1 API request/response types under [`api::v1`].

use serde::{Deserialize, Serialize};

pub mod api;
pub mod policy;
pub mod secret;
pub mod spiffe;

/// Opaque identifier of a configured Keeper peer.
///
/// Keeper ids sort lexicographically; the i-th id in sorted order owns the
/// i-th shard of every split, which keeps the shard-to-Keeper mapping stable
/// across restarts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeeperId(String);

impl KeeperId {
    /// Wraps a Keeper id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeeperId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeeperId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
