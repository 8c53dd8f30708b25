//! Access policies and their evaluation.
//!
//! A policy is a pair of anchored regular expressions (one over the peer
//! SPIFFE ID, one over the target path) plus a set of granted permissions.
//! Evaluation is a pure function over (peer, path, required permissions,
//! policy set); the router feeds it the compiled policy set held by the
//! policy store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spiffe::SpiffeId;

/// A single grantable permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read secret values and metadata.
    Read,
    /// Create versions, soft-delete and undelete them.
    Write,
    /// Enumerate secret paths.
    List,
    /// Soft-delete versions.
    Delete,
    /// Reverse a soft-delete.
    Undelete,
    /// Use the encrypt/decrypt service routes.
    Execute,
    /// Administrative: implies every other permission, required for policy
    /// management.
    Super,
}

/// An access policy as stored and served by the policy routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy id.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Anchored regex over the full peer SPIFFE ID string.
    pub spiffe_id_pattern: String,
    /// Anchored regex over the target secret path.
    pub path_pattern: String,
    /// Permissions this policy grants.
    pub permissions: HashSet<Permission>,
    /// When the policy was created.
    pub created_at: DateTime<Utc>,
    /// Who created the policy.
    pub created_by: SpiffeId,
}

/// Errors when compiling a policy's patterns.
#[derive(Debug, thiserror::Error)]
pub enum PolicyCompileError {
    /// The SPIFFE ID pattern is not a valid regular expression.
    #[error("invalid spiffe_id_pattern: {0}")]
    SpiffeIdPattern(regex::Error),
    /// The path pattern is not a valid regular expression.
    #[error("invalid path_pattern: {0}")]
    PathPattern(regex::Error),
}

/// A [`Policy`] with its patterns compiled for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    policy: Policy,
    spiffe_id_matcher: Regex,
    path_matcher: Regex,
}

impl CompiledPolicy {
    /// Compiles both patterns, anchoring them so a policy for `app/.*` does
    /// not accidentally match `other/app/x`.
    pub fn compile(policy: Policy) -> Result<Self, PolicyCompileError> {
        let spiffe_id_matcher = anchored(&policy.spiffe_id_pattern)
            .map_err(PolicyCompileError::SpiffeIdPattern)?;
        let path_matcher =
            anchored(&policy.path_pattern).map_err(PolicyCompileError::PathPattern)?;
        Ok(Self {
            policy,
            spiffe_id_matcher,
            path_matcher,
        })
    }

    /// The plain policy data.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Whether this policy applies to the given peer and path.
    pub fn matches(&self, peer: &SpiffeId, path: &str) -> bool {
        self.spiffe_id_matcher.is_match(&peer.to_string()) && self.path_matcher.is_match(path)
    }

    /// Whether this policy grants every required permission. [`Permission::Super`]
    /// grants everything.
    pub fn grants(&self, required: &[Permission]) -> bool {
        self.policy.permissions.contains(&Permission::Super)
            || required
                .iter()
                .all(|permission| self.policy.permissions.contains(permission))
    }
}

/// Evaluates a policy set: the request is allowed iff at least one policy
/// matches both the peer and the path and grants all required permissions.
pub fn evaluate<'a>(
    policies: impl IntoIterator<Item = &'a CompiledPolicy>,
    peer: &SpiffeId,
    path: &str,
    required: &[Permission],
) -> bool {
    policies
        .into_iter()
        .any(|policy| policy.matches(peer, path) && policy.grants(required))
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}
