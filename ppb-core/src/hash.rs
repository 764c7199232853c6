//! ContentDigest: a SHA-256 content hash as 64 lowercase hex characters.

use crate::error::{PpbError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a full digest in hex characters.
pub const DIGEST_LEN: usize = 64;

/// Length of the canonical short identifier in hex characters.
pub const SHORT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

/// Result of hashing a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hashed {
    pub size: u64,
    pub digest: ContentDigest,
}

/// Hash a payload, returning its byte length and digest.
pub fn hash(data: &[u8]) -> Hashed {
    Hashed {
        size: data.len() as u64,
        digest: ContentDigest::from_data(data),
    }
}

impl ContentDigest {
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a full-length digest; uppercase hex is normalized.
    pub fn from_str_checked(s: &str) -> Result<Self> {
        if s.len() != DIGEST_LEN || !is_hex(s) {
            return Err(PpbError::InvalidDigest(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// First 16 hex characters, used as the display identifier.
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

}

pub(crate) fn is_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentDigest {
    type Err = PpbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_str_checked(s)
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = PpbError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_str_checked(&s)
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl AsRef<str> for ContentDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
