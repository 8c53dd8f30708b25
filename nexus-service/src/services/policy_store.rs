//! This module provides [`PolicyStore`], which holds the compiled access
//! policies. Access is synchronized via a `RwLock` and wrapped in an `Arc`
//! for thread-safe shared ownership.
//!
//! Policies live in memory only: the backing store persists secrets, not
//! policies, so an operator re-applies policy after a restart the same way
//! they applied it initially.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use nexus_types::policy::{self, CompiledPolicy, Permission, Policy, PolicyCompileError};
use nexus_types::spiffe::SpiffeId;
use parking_lot::RwLock;
use uuid::Uuid;

/// Errors returned by the [`PolicyStore`].
#[derive(Debug, thiserror::Error)]
pub enum PolicyStoreError {
    /// No policy with the given id exists.
    #[error("unknown policy id: {0}")]
    UnknownPolicy(Uuid),
    /// A pattern failed to compile.
    #[error(transparent)]
    Compile(#[from] PolicyCompileError),
}

/// Storage for [`CompiledPolicy`]s.
#[derive(Default, Clone)]
pub struct PolicyStore(Arc<RwLock<HashMap<Uuid, CompiledPolicy>>>);

impl PolicyStore {
    /// Compiles and stores a new policy, returning the stored data.
    pub fn create(
        &self,
        name: String,
        spiffe_id_pattern: String,
        path_pattern: String,
        permissions: HashSet<Permission>,
        created_by: SpiffeId,
    ) -> Result<Policy, PolicyStoreError> {
        let policy = Policy {
            id: Uuid::new_v4(),
            name,
            spiffe_id_pattern,
            path_pattern,
            permissions,
            created_at: Utc::now(),
            created_by,
        };
        let compiled = CompiledPolicy::compile(policy.clone())?;
        self.0.write().insert(policy.id, compiled);
        tracing::info!("created policy {} ({})", policy.name, policy.id);
        Ok(policy)
    }

    /// Returns the policy with the given id.
    pub fn get(&self, id: Uuid) -> Result<Policy, PolicyStoreError> {
        self.0
            .read()
            .get(&id)
            .map(|compiled| compiled.policy().clone())
            .ok_or(PolicyStoreError::UnknownPolicy(id))
    }

    /// Removes the policy with the given id.
    pub fn delete(&self, id: Uuid) -> Result<(), PolicyStoreError> {
        if self.0.write().remove(&id).is_some() {
            tracing::info!("deleted policy {id}");
            Ok(())
        } else {
            Err(PolicyStoreError::UnknownPolicy(id))
        }
    }

    /// Every stored policy, sorted by name for stable listings.
    pub fn list(&self) -> Vec<Policy> {
        let mut policies: Vec<Policy> = self
            .0
            .read()
            .values()
            .map(|compiled| compiled.policy().clone())
            .collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        policies
    }

    /// Whether any stored policy allows `peer` to act on `path` with all of
    /// `required`.
    pub fn allows(&self, peer: &SpiffeId, path: &str, required: &[Permission]) -> bool {
        policy::evaluate(self.0.read().values(), peer, path, required)
    }
}
