//! Keys module
//!
//! Holds a secp256k1 secret key together with its derived x-only identity.
//! Secret hex renderings are handed out wrapped in `Zeroizing` so they are
//! wiped when dropped.

use super::identity::{Identity, IdentityError};
use secp256k1::{SecretKey, SECP256K1};
use std::fmt;
use zeroize::Zeroizing;

/// A secret key and the identity it controls
#[derive(Clone, PartialEq, Eq)]
pub struct Keys {
    secret: SecretKey,
    public: Identity,
}

impl Keys {
    /// Parse a hex-encoded secret key
    pub fn parse(secret_hex: &str) -> Result<Self, IdentityError> {
        let bytes = Zeroizing::new(
            hex::decode(secret_hex.trim())
                .map_err(|e| IdentityError::InvalidSecretKey(e.to_string()))?,
        );
        Self::from_slice(&bytes)
    }

    /// Build keys from raw secret bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| IdentityError::InvalidSecretKey(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }

    /// Build keys from an already validated secret
    pub fn from_secret(secret: SecretKey) -> Self {
        let (xonly, _parity) = secret.x_only_public_key(SECP256K1);
        Keys { secret, public: Identity::from_bytes(&xonly.serialize()) }
    }

    /// Generate a fresh random keypair
    pub fn generate() -> Self {
        loop {
            let candidate = Zeroizing::new(rand::random::<[u8; 32]>());
            // Out-of-range scalars are astronomically rare; draw again
            if let Ok(secret) = SecretKey::from_slice(candidate.as_ref()) {
                return Self::from_secret(secret);
            }
        }
    }

    /// The identity these keys control
    pub fn identity(&self) -> &Identity {
        &self.public
    }

    /// Underlying secret key
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// Secret key as lowercase hex
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.secret.secret_bytes()))
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}
