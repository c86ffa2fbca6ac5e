/*
    identity.rs - Canonical public identities

    An identity is a 32-byte x-only secp256k1 public key rendered as 64
    lowercase hex characters. Input is canonicalized exactly once, on parse;
    everything downstream compares canonical strings.
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a hex-encoded identity
pub const IDENTITY_HEX_LEN: usize = 64;

/// Identity and key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Invalid identity length: expected 64 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("Invalid hex in identity: {0}")]
    InvalidHex(String),

    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),
}

/// Canonical public identity of a participant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parse and canonicalize a hex identity
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let trimmed = input.trim();
        if trimmed.len() != IDENTITY_HEX_LEN {
            return Err(IdentityError::InvalidLength(trimmed.len()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdentityError::InvalidHex(trimmed.to_string()));
        }

        Ok(Identity(trimmed.to_ascii_lowercase()))
    }

    /// Build an identity from raw x-only key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Identity(hex::encode(bytes))
    }

    /// Raw 32 key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // Canonical form is validated hex of the right length
        if hex::decode_to_slice(&self.0, &mut out).is_err() {
            out = [0u8; 32];
        }
        out
    }

    /// Canonical hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identity::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
