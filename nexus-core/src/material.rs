//! Root-key and key-shard material.
//!
//! Secret state wrappers purposefully do not implement `Debug` or `Display`
//! to avoid accidental leakage. The root key additionally has no serde
//! support at all: it must never leave this process in serialized form.

use p256::elliptic_curve::{Field as _, PrimeField as _};
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq as _;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Byte length of the root key and of a shard secret (one P-256 scalar).
pub const SECRET_LEN: usize = 32;

/// The 32-byte root key of a Nexus instance.
///
/// Generated once at day zero (or reconstructed from Keeper shards) and held
/// exclusively by the root-key cell. The bytes are the big-endian encoding of
/// a P-256 scalar, so splitting the key into shards can never fail to decode.
///
/// Comparison is constant-time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey([u8; SECRET_LEN]);

impl RootKey {
    /// Generates a fresh root key from the provided cryptographically strong RNG.
    ///
    /// The key is sampled as a uniformly random P-256 scalar and stored in its
    /// canonical 32-byte encoding.
    pub fn generate(rng: &mut (impl CryptoRng + Rng)) -> Self {
        let scalar = p256::Scalar::random(rng);
        let bytes: [u8; SECRET_LEN] = scalar.to_repr().into();
        Self(bytes)
    }

    /// Wraps existing key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Read access to the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    /// Constant-time equality check.
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl PartialEq for RootKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other)
    }
}

impl Eq for RootKey {}

/// The 1-based index of a shard within a split (the x-coordinate of the
/// evaluation point).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ShareIndex(std::num::NonZeroU8);

impl ShareIndex {
    /// Creates a new index. Returns `None` for zero (zero would leak the
    /// secret as the polynomial's constant term).
    pub fn new(index: u8) -> Option<Self> {
        std::num::NonZeroU8::new(index).map(Self)
    }

    /// Returns the index as a plain `u8`.
    pub fn get(self) -> u8 {
        self.0.get()
    }
}

impl std::fmt::Display for ShareIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The secret part of a key shard: the 32-byte encoding of a P-256 scalar.
///
/// Serializes as standard base64 so it can travel in JSON bodies to Keepers
/// and Pilots. Not `Debug`/`Display` to avoid accidental leaks.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ShardSecret(
    #[serde(
        serialize_with = "b64::serialize_secret",
        deserialize_with = "b64::deserialize_secret"
    )]
    [u8; SECRET_LEN],
);

impl ShardSecret {
    /// Wraps existing scalar bytes.
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Read access to the raw scalar bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    /// Constant-time equality check.
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

/// One Shamir shard of the root key.
///
/// Transient on the Nexus side: computed on demand from the live root key,
/// pushed to a Keeper, then dropped (which zeroizes the secret part).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShard {
    /// The evaluation point this shard belongs to.
    #[zeroize(skip)]
    pub index: ShareIndex,
    /// The scalar share.
    pub secret: ShardSecret,
}

mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize as _, Deserializer, Serializer, de::Error as _};

    use super::SECRET_LEN;

    pub(super) fn serialize_secret<S: Serializer>(
        bytes: &[u8; SECRET_LEN],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize_secret<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; SECRET_LEN], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = STANDARD
            .decode(&encoded)
            .map_err(|err| D::Error::custom(format!("invalid base64: {err}")))?;
        decoded
            .try_into()
            .map_err(|_| D::Error::custom("shard secret must be exactly 32 bytes"))
    }
}
