//! Version 1 wire types.
//!
//! Everything a Nexus serves or sends is `POST` with a JSON body (the cipher
//! routes additionally accept `application/octet-stream`, which never reaches
//! these types). Multi-operation routes select their operation with the
//! `action` query parameter, deserialized into [`Action`].

use std::collections::{BTreeMap, HashMap};

use nexus_core::material::{ShardSecret, ShareIndex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::KeeperId;
use crate::policy::{Permission, Policy};
use crate::secret::{SecretMetadata, SecretPath, SecretVersionStamp};

/// The operation selector carried in the `action` query parameter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// The route's primary operation (secrets: put, policy: create,
    /// cipher/operator: the only operation).
    #[default]
    Default,
    /// Read.
    Get,
    /// Soft-delete.
    Delete,
    /// Reverse a soft-delete.
    Undelete,
    /// Enumerate.
    List,
}

/// Query wrapper so an absent `action` parameter selects [`Action::Default`].
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct ActionQuery {
    /// The requested operation.
    #[serde(default)]
    pub action: Action,
}

// --- Keeper wire contract -------------------------------------------------

/// `POST <keeper>/v1/store/contribute` – push one shard to a Keeper.
#[derive(Clone, Serialize, Deserialize)]
pub struct ContributeShardRequest {
    /// The receiving Keeper's configured id.
    pub keeper_id: KeeperId,
    /// The shard for this Keeper. The shard index is not on the wire: it is
    /// implied by the Keeper's position in the lexicographic id order.
    pub shard: ShardSecret,
}

/// Ack body of a contribute call. May be entirely empty on the wire.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ContributeShardResponse {}

/// `POST <keeper>/v1/store/shard` – ask a Keeper for the shard it holds.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FetchShardRequest {}

/// Response of a shard fetch; `shard` is absent while the Keeper holds none.
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct FetchShardResponse {
    /// The held shard, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardSecret>,
}

// --- Secrets --------------------------------------------------------------

/// `action=default` – versioned upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretPutRequest {
    /// Target path.
    pub path: SecretPath,
    /// The new version's key/value payload.
    pub values: HashMap<String, String>,
}

/// Response of an upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretPutResponse {
    /// The version number the write created.
    pub version: u32,
}

/// `action=get` – read one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretGetRequest {
    /// Target path.
    pub path: SecretPath,
    /// Version to read; `0` (the default) reads the current version.
    #[serde(default)]
    pub version: u32,
}

/// Response of a read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretGetResponse {
    /// The version's key/value payload.
    pub data: HashMap<String, String>,
}

/// `action=delete` / `action=undelete` – soft-delete or restore versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersionsRequest {
    /// Target path.
    pub path: SecretPath,
    /// Versions to affect; empty means the current version only.
    #[serde(default)]
    pub versions: Vec<u32>,
}

/// Empty ack for delete/undelete.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SecretVersionsResponse {}

/// `action=list` – enumerate paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretListResponse {
    /// Every known path, regardless of deletion state.
    pub keys: Vec<String>,
}

/// `secrets/metadata?action=get` – read metadata without values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadataRequest {
    /// Target path.
    pub path: SecretPath,
    /// Accepted for parity with `get`; metadata always covers all retained
    /// versions.
    #[serde(default)]
    pub version: u32,
}

/// Response of a metadata read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadataResponse {
    /// Timestamps per retained version, no values.
    pub versions: BTreeMap<u32, SecretVersionStamp>,
    /// The secret's bookkeeping metadata.
    pub metadata: SecretMetadata,
}

// --- Policies -------------------------------------------------------------

/// `action=default` – create a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCreateRequest {
    /// Human-readable name.
    pub name: String,
    /// Anchored regex over peer SPIFFE IDs.
    pub spiffe_id_pattern: String,
    /// Anchored regex over secret paths.
    pub path_pattern: String,
    /// Permissions to grant.
    pub permissions: std::collections::HashSet<Permission>,
}

/// Response of a policy creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCreateResponse {
    /// The new policy's id.
    pub id: Uuid,
}

/// `action=get` / `action=delete` – address a policy by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyByIdRequest {
    /// The policy id.
    pub id: Uuid,
}

/// Response of a policy read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyGetResponse {
    /// The policy.
    pub policy: Policy,
}

/// Empty ack for a policy deletion.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PolicyDeleteResponse {}

/// `action=list` – every policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyListResponse {
    /// All policies.
    pub policies: Vec<Policy>,
}

// --- Cipher (encryption as a service) -------------------------------------

/// JSON shape of `/v1/cipher/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptRequest {
    /// Base64 plaintext.
    pub plaintext: String,
}

/// JSON response of an encrypt call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptResponse {
    /// Sealing format version, `"1"`.
    pub version: String,
    /// Base64 nonce (12 bytes).
    pub nonce: String,
    /// Base64 ciphertext including the authentication tag.
    pub ciphertext: String,
}

/// JSON shape of `/v1/cipher/decrypt`; mirrors [`EncryptResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptRequest {
    /// Sealing format version, `"1"`.
    pub version: String,
    /// Base64 nonce (12 bytes).
    pub nonce: String,
    /// Base64 ciphertext including the authentication tag.
    pub ciphertext: String,
}

/// JSON response of a decrypt call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptResponse {
    /// Base64 plaintext.
    pub plaintext: String,
}

// --- Operator break-glass -------------------------------------------------

/// One operator-held shard on the wire.
#[derive(Clone, Serialize, Deserialize)]
pub struct OperatorShard {
    /// The shard's evaluation point.
    pub id: ShareIndex,
    /// The scalar share.
    pub shard: ShardSecret,
}

/// Response of `/v1/operator/recover`: the full shard set for the operator
/// to store offline.
#[derive(Clone, Serialize, Deserialize)]
pub struct RecoverResponse {
    /// The shard set; any `threshold` of them restore the root key.
    pub shards: Vec<OperatorShard>,
    /// How many distinct shards a restore needs.
    pub threshold: u8,
}

/// Request of `/v1/operator/restore`: one shard per call.
#[derive(Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    /// The shard's evaluation point.
    pub id: ShareIndex,
    /// The scalar share.
    pub shard: ShardSecret,
}

/// Progress report of a restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResponse {
    /// Distinct shards collected so far.
    pub collected: usize,
    /// How many distinct shards the restore needs.
    pub threshold: u8,
    /// Whether the root key has been restored.
    pub restored: bool,
}
