//! The versioned secret entity and its metadata discipline.
//!
//! A [`Secret`] is the per-path value stored by the backing store: a window of
//! at most `max_versions` numbered versions plus bookkeeping metadata. All
//! version-window maintenance (monotonic numbering, pruning, soft-delete and
//! `current_version` recomputation) lives here as pure logic so the in-memory
//! and the sealed persistent backend behave identically.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of retained versions per secret.
pub const DEFAULT_MAX_VERSIONS: u32 = 10;

/// Maximum length of a secret path.
const MAX_PATH_LEN: usize = 255;

/// Maximum length of a key name inside a secret's data map.
const MAX_KEY_LEN: usize = 255;

/// Errors when validating a secret path.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    /// The path is empty.
    #[error("secret path must not be empty")]
    Empty,
    /// The path exceeds [`MAX_PATH_LEN`] bytes.
    #[error("secret path too long: {0} bytes")]
    TooLong(usize),
    /// The path contains a character outside `[A-Za-z0-9._/-]` or a
    /// malformed segment.
    #[error("invalid secret path: {0:?}")]
    Invalid(String),
}

/// A validated secret path such as `app/db/creds`.
///
/// Slash-separated segments of `[A-Za-z0-9._-]`, no leading or trailing
/// slash, no empty and no dot-only segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretPath(String);

impl SecretPath {
    /// Parses and validates a path.
    pub fn new(path: impl Into<String>) -> Result<Self, PathError> {
        let path = path.into();
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        if path.len() > MAX_PATH_LEN {
            return Err(PathError::TooLong(path.len()));
        }
        for segment in path.split('/') {
            let valid = !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
            if !valid {
                return Err(PathError::Invalid(path));
            }
        }
        Ok(Self(path))
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SecretPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SecretPath> for String {
    fn from(value: SecretPath) -> Self {
        value.0
    }
}

impl std::str::FromStr for SecretPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for SecretPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validates a key name inside a secret's data map.
pub fn validate_key_name(key: &str) -> Result<(), PathError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
    if valid {
        Ok(())
    } else {
        Err(PathError::Invalid(key.to_owned()))
    }
}

/// Errors when looking up a version inside a [`Secret`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionLookupError {
    /// The requested version is not retained (never existed or pruned).
    #[error("version {0} not found")]
    NotFound(u32),
    /// The requested version exists but is soft-deleted.
    #[error("version {0} is deleted")]
    Deleted(u32),
}

/// One stored version of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretVersion {
    /// The key/value payload.
    pub data: HashMap<String, String>,
    /// When this version was written.
    pub created_at: DateTime<Utc>,
    /// Set while this version is soft-deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Timestamps of one version, exposed by the metadata operation (no values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretVersionStamp {
    /// When this version was written.
    pub created_at: DateTime<Utc>,
    /// Set while this version is soft-deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Bookkeeping metadata of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Highest non-deleted version, or 0 when every version is deleted.
    pub current_version: u32,
    /// Smallest retained version number, or 0 before the first write.
    pub oldest_version: u32,
    /// The retention window.
    pub max_versions: u32,
    /// When the secret was first created.
    pub created_at: DateTime<Utc>,
    /// When the secret was last modified.
    pub updated_at: DateTime<Utc>,
}

/// A path's versioned value: the retained versions plus metadata.
///
/// Invariants maintained by the mutating methods:
/// - version numbers increase monotonically and are never reused,
/// - at most `max_versions` versions are retained; writing beyond the window
///   evicts the oldest version,
/// - `current_version` is the highest non-deleted version, or 0 when all
///   retained versions are deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Retained versions, keyed by version number.
    pub versions: BTreeMap<u32, SecretVersion>,
    /// Bookkeeping metadata.
    pub metadata: SecretMetadata,
}

impl Secret {
    /// Creates an empty secret with the given retention window.
    pub fn new(max_versions: u32, now: DateTime<Utc>) -> Self {
        Self {
            versions: BTreeMap::new(),
            metadata: SecretMetadata {
                current_version: 0,
                oldest_version: 0,
                max_versions: max_versions.max(1),
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Appends a new version holding `data` and returns its number.
    ///
    /// Evicts the oldest version when the window overflows.
    pub fn upsert(&mut self, data: HashMap<String, String>, now: DateTime<Utc>) -> u32 {
        let next = self
            .versions
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
            .saturating_add(1);
        self.versions.insert(
            next,
            SecretVersion {
                data,
                created_at: now,
                deleted_at: None,
            },
        );
        while self.versions.len() > self.metadata.max_versions as usize {
            let oldest = *self.versions.keys().next().expect("window is non-empty");
            self.versions.remove(&oldest);
        }
        self.metadata.oldest_version = self.versions.keys().next().copied().unwrap_or(0);
        self.metadata.current_version = next;
        self.metadata.updated_at = now;
        next
    }

    /// Resolves a version for reading. `0` means the current version.
    pub fn version_for_get(&self, requested: u32) -> Result<&SecretVersion, VersionLookupError> {
        let version = if requested == 0 {
            self.metadata.current_version
        } else {
            requested
        };
        let entry = self
            .versions
            .get(&version)
            .ok_or(VersionLookupError::NotFound(version))?;
        if entry.deleted_at.is_some() {
            return Err(VersionLookupError::Deleted(version));
        }
        Ok(entry)
    }

    /// Soft-deletes the listed versions; an empty list means the current
    /// version only. Unknown version numbers are ignored.
    pub fn mark_deleted(&mut self, requested: &[u32], now: DateTime<Utc>) {
        let targets: Vec<u32> = if requested.is_empty() {
            vec![self.metadata.current_version]
        } else {
            requested.to_vec()
        };
        for version in targets {
            if let Some(entry) = self.versions.get_mut(&version) {
                entry.deleted_at = Some(now);
            }
        }
        self.recompute_current();
        self.metadata.updated_at = now;
    }

    /// Clears the soft-delete marker on the listed versions. Unknown version
    /// numbers are ignored.
    pub fn undelete(&mut self, requested: &[u32], now: DateTime<Utc>) {
        for version in requested {
            if let Some(entry) = self.versions.get_mut(version) {
                entry.deleted_at = None;
            }
        }
        self.recompute_current();
        self.metadata.updated_at = now;
    }

    /// The per-version timestamps, for the metadata operation.
    pub fn version_stamps(&self) -> BTreeMap<u32, SecretVersionStamp> {
        self.versions
            .iter()
            .map(|(version, entry)| {
                (
                    *version,
                    SecretVersionStamp {
                        created_at: entry.created_at,
                        deleted_at: entry.deleted_at,
                    },
                )
            })
            .collect()
    }

    // current_version = highest non-deleted retained version, or 0
    fn recompute_current(&mut self) {
        self.metadata.current_version = self
            .versions
            .iter()
            .rev()
            .find(|(_, entry)| entry.deleted_at.is_none())
            .map(|(version, _)| *version)
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(marker: &str) -> HashMap<String, String> {
        HashMap::from([("value".to_owned(), marker.to_owned())])
    }

    #[test]
    fn paths_are_validated() {
        assert!(SecretPath::new("app/db/creds").is_ok());
        assert!(SecretPath::new("single").is_ok());
        assert_eq!(SecretPath::new(""), Err(PathError::Empty));
        assert!(SecretPath::new("/leading").is_err());
        assert!(SecretPath::new("trailing/").is_err());
        assert!(SecretPath::new("a//b").is_err());
        assert!(SecretPath::new("a/../b").is_err());
        assert!(SecretPath::new("spaces are bad").is_err());
        assert!(SecretPath::new("x".repeat(300)).is_err());
    }

    #[test]
    fn successive_puts_are_monotonic() {
        let now = Utc::now();
        let mut secret = Secret::new(DEFAULT_MAX_VERSIONS, now);
        for k in 1..=7u32 {
            assert_eq!(secret.upsert(values(&k.to_string()), now), k);
            assert_eq!(secret.metadata.current_version, k);
            assert_eq!(secret.versions.len(), k as usize);
        }
        assert_eq!(secret.metadata.oldest_version, 1);
    }

    #[test]
    fn window_evicts_oldest_and_numbers_stay_contiguous() {
        let now = Utc::now();
        let mut secret = Secret::new(3, now);
        for k in 1..=5u32 {
            secret.upsert(values(&k.to_string()), now);
        }
        assert_eq!(secret.metadata.current_version, 5);
        assert_eq!(secret.metadata.oldest_version, 3);
        let retained: Vec<u32> = secret.versions.keys().copied().collect();
        assert_eq!(retained, vec![3, 4, 5]);
        assert!(matches!(
            secret.version_for_get(1),
            Err(VersionLookupError::NotFound(1))
        ));
    }

    #[test]
    fn get_zero_resolves_current() {
        let now = Utc::now();
        let mut secret = Secret::new(DEFAULT_MAX_VERSIONS, now);
        secret.upsert(values("one"), now);
        secret.upsert(values("two"), now);
        assert_eq!(secret.version_for_get(0).unwrap().data, values("two"));
        assert_eq!(secret.version_for_get(1).unwrap().data, values("one"));
    }

    #[test]
    fn delete_empty_list_targets_current_only() {
        let now = Utc::now();
        let mut secret = Secret::new(DEFAULT_MAX_VERSIONS, now);
        secret.upsert(values("one"), now);
        secret.upsert(values("two"), now);
        secret.mark_deleted(&[], now);
        assert_eq!(secret.metadata.current_version, 1);
        assert!(matches!(
            secret.version_for_get(2),
            Err(VersionLookupError::Deleted(2))
        ));
        // data is retained under the soft-delete marker
        assert!(secret.versions[&2].deleted_at.is_some());
        assert_eq!(secret.versions[&2].data, values("two"));
    }

    #[test]
    fn delete_undelete_are_symmetric() {
        let now = Utc::now();
        let mut secret = Secret::new(DEFAULT_MAX_VERSIONS, now);
        secret.upsert(values("one"), now);
        secret.upsert(values("two"), now);

        secret.mark_deleted(&[1], now);
        assert_eq!(secret.metadata.current_version, 2);

        secret.undelete(&[1], now);
        assert_eq!(secret.metadata.current_version, 2);
        assert_eq!(secret.version_for_get(1).unwrap().data, values("one"));
    }

    #[test]
    fn deleting_every_version_zeroes_current() {
        let now = Utc::now();
        let mut secret = Secret::new(DEFAULT_MAX_VERSIONS, now);
        secret.upsert(values("one"), now);
        secret.upsert(values("two"), now);
        secret.mark_deleted(&[1, 2], now);
        assert_eq!(secret.metadata.current_version, 0);
        assert!(secret.version_for_get(0).is_err());

        secret.undelete(&[2], now);
        assert_eq!(secret.metadata.current_version, 2);
    }

    #[test]
    fn put_after_delete_all_continues_numbering() {
        let now = Utc::now();
        let mut secret = Secret::new(DEFAULT_MAX_VERSIONS, now);
        secret.upsert(values("one"), now);
        secret.mark_deleted(&[1], now);
        assert_eq!(secret.metadata.current_version, 0);
        assert_eq!(secret.upsert(values("two"), now), 2);
        assert_eq!(secret.metadata.current_version, 2);
    }

    #[test]
    fn unknown_versions_are_ignored_by_delete_and_undelete() {
        let now = Utc::now();
        let mut secret = Secret::new(DEFAULT_MAX_VERSIONS, now);
        secret.upsert(values("one"), now);
        secret.mark_deleted(&[42], now);
        assert_eq!(secret.metadata.current_version, 1);
        secret.undelete(&[42], now);
        assert_eq!(secret.metadata.current_version, 1);
    }

    #[test]
    fn version_stamps_carry_no_data() {
        let now = Utc::now();
        let mut secret = Secret::new(DEFAULT_MAX_VERSIONS, now);
        secret.upsert(values("one"), now);
        secret.mark_deleted(&[1], now);
        let stamps = secret.version_stamps();
        assert_eq!(stamps.len(), 1);
        assert!(stamps[&1].deleted_at.is_some());
    }

    #[test]
    fn entity_roundtrips_through_json() {
        let now = Utc::now();
        let mut secret = Secret::new(5, now);
        secret.upsert(values("one"), now);
        secret.mark_deleted(&[], now);
        let json = serde_json::to_vec(&secret).unwrap();
        let back: Secret = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, secret);
    }
}
