//! SPIFFE identities and trust domains.
//!
//! The TLS layer is a collaborator: something outside this codebase (a SPIFFE
//! workload API, an mTLS-terminating front end) verifies the peer certificate
//! and hands the router a URI of the form `spiffe://<trust-domain>/<path>`.
//! This module only parses and classifies such URIs; it never touches
//! certificates.

use serde::{Deserialize, Serialize};

/// Errors when parsing a SPIFFE ID or trust domain.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpiffeIdError {
    /// Missing the `spiffe://` scheme.
    #[error("SPIFFE ID must start with spiffe://")]
    MissingScheme,
    /// The trust domain component is empty or contains invalid characters.
    #[error("invalid trust domain: {0:?}")]
    InvalidTrustDomain(String),
    /// A path segment is empty or contains invalid characters.
    #[error("invalid SPIFFE path segment: {0:?}")]
    InvalidPathSegment(String),
    /// The identifier exceeds the maximum permitted length.
    #[error("SPIFFE ID too long: {0} bytes")]
    TooLong(usize),
}

/// Maximum accepted length of a full SPIFFE ID string.
const MAX_SPIFFE_ID_LEN: usize = 2048;

/// A SPIFFE trust domain (the authority component of a SPIFFE ID).
///
/// Lower-case letters, digits, dots, dashes and underscores only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrustDomain(String);

impl TrustDomain {
    /// Parses and validates a trust-domain name.
    pub fn new(name: impl Into<String>) -> Result<Self, SpiffeIdError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 255
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_'));
        if valid {
            Ok(Self(name))
        } else {
            Err(SpiffeIdError::InvalidTrustDomain(name))
        }
    }

    /// Returns the domain name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TrustDomain {
    type Error = SpiffeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TrustDomain> for String {
    fn from(value: TrustDomain) -> Self {
        value.0
    }
}

impl std::str::FromStr for TrustDomain {
    type Err = SpiffeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A verified SPIFFE identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    path: String,
}

impl SpiffeId {
    /// Parses a `spiffe://<trust-domain>/<path>` URI.
    pub fn parse(input: &str) -> Result<Self, SpiffeIdError> {
        if input.len() > MAX_SPIFFE_ID_LEN {
            return Err(SpiffeIdError::TooLong(input.len()));
        }
        let rest = input
            .strip_prefix("spiffe://")
            .ok_or(SpiffeIdError::MissingScheme)?;
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };
        let trust_domain = TrustDomain::new(authority)?;
        if !path.is_empty() {
            for segment in path.split('/') {
                let valid = !segment.is_empty()
                    && segment != "."
                    && segment != ".."
                    && segment
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
                if !valid {
                    return Err(SpiffeIdError::InvalidPathSegment(segment.to_owned()));
                }
            }
        }
        Ok(Self {
            trust_domain,
            path: path.to_owned(),
        })
    }

    /// The trust domain of this identity.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// The workload path, without the leading slash. Empty for a bare
    /// trust-domain identity.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this identity belongs to the given trust domain.
    pub fn member_of(&self, trust_domain: &TrustDomain) -> bool {
        &self.trust_domain == trust_domain
    }
}

impl TryFrom<String> for SpiffeId {
    type Error = SpiffeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SpiffeId> for String {
    fn from(value: SpiffeId) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for SpiffeId {
    type Err = SpiffeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "spiffe://{}", self.trust_domain)
        } else {
            write!(f, "spiffe://{}/{}", self.trust_domain, self.path)
        }
    }
}
