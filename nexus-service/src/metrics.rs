//! Metrics definitions for the Nexus service.
//!
//! This module defines all metrics keys used by the service and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

/// Metrics key for whether the root-key cell currently holds a key (0/1).
pub const METRICS_ID_ROOT_KEY_PRESENT: &str = "nexus.root_key.present";
/// Metrics key for shards collected while recovering.
pub const METRICS_ID_BOOTSTRAP_SHARDS_COLLECTED: &str = "nexus.bootstrap.shards.collected";
/// Metrics key for completed shard distributions (initial and periodic).
pub const METRICS_ID_DISTRIBUTIONS_COMPLETED: &str = "nexus.bootstrap.distributions.completed";
/// Metrics key for successful shard contributions to Keepers.
pub const METRICS_ID_KEEPER_CONTRIBUTE_SUCCESS: &str = "nexus.keeper.contribute.success";
/// Metrics key for failed shard contributions to Keepers.
pub const METRICS_ID_KEEPER_CONTRIBUTE_ERROR: &str = "nexus.keeper.contribute.error";
/// Metrics key for encrypt operations served.
pub const METRICS_ID_CIPHER_ENCRYPT: &str = "nexus.cipher.encrypt";
/// Metrics key for decrypt operations served.
pub const METRICS_ID_CIPHER_DECRYPT: &str = "nexus.cipher.decrypt";
/// Metrics key for requests rejected by the authorization pipeline.
pub const METRICS_ID_REQUESTS_DENIED: &str = "nexus.api.denied";

/// Describe all metrics used by the service.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_ROOT_KEY_PRESENT,
        metrics::Unit::Count,
        "Whether the root-key cell currently holds a key"
    );

    metrics::describe_gauge!(
        METRICS_ID_BOOTSTRAP_SHARDS_COLLECTED,
        metrics::Unit::Count,
        "Distinct shards collected from Keepers while recovering"
    );

    metrics::describe_counter!(
        METRICS_ID_DISTRIBUTIONS_COMPLETED,
        metrics::Unit::Count,
        "Completed shard distributions to the full Keeper set"
    );

    metrics::describe_counter!(
        METRICS_ID_KEEPER_CONTRIBUTE_SUCCESS,
        metrics::Unit::Count,
        "Successful shard contributions to Keepers"
    );

    metrics::describe_counter!(
        METRICS_ID_KEEPER_CONTRIBUTE_ERROR,
        metrics::Unit::Count,
        "Failed shard contributions to Keepers"
    );

    metrics::describe_counter!(
        METRICS_ID_CIPHER_ENCRYPT,
        metrics::Unit::Count,
        "Encrypt operations served"
    );

    metrics::describe_counter!(
        METRICS_ID_CIPHER_DECRYPT,
        metrics::Unit::Count,
        "Decrypt operations served"
    );

    metrics::describe_counter!(
        METRICS_ID_REQUESTS_DENIED,
        metrics::Unit::Count,
        "Requests rejected by the authorization pipeline"
    );
}
