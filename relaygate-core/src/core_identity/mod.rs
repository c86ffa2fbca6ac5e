//! Identity module
//!
//! Public identities (x-only secp256k1 keys, hex encoded) and the secret
//! key material the relay holds for itself and for trusted recipients.

pub mod identity;
pub mod keys;

pub use identity::{Identity, IdentityError};
pub use keys::Keys;
