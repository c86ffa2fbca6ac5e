//! Envelope cryptography
//!
//! Conversation key derivation and caching, plus the two payload schemes
//! used by wrapped envelopes.

pub mod conversation;
pub mod error;
pub mod nip04;
pub mod nip44;

pub use conversation::{ConversationKey, ConversationKeyCache, Scheme};
pub use error::{CryptoError, CryptoResult};

/// Encrypt `plaintext` under `scheme`
pub fn encrypt(scheme: Scheme, key: &ConversationKey, plaintext: &str) -> CryptoResult<String> {
    match scheme {
        Scheme::Current => nip44::encrypt(key, plaintext),
        Scheme::Legacy => nip04::encrypt(key, plaintext),
    }
}

/// Decrypt `payload` under `scheme`
pub fn decrypt(scheme: Scheme, key: &ConversationKey, payload: &str) -> CryptoResult<String> {
    match scheme {
        Scheme::Current => nip44::decrypt(key, payload),
        Scheme::Legacy => nip04::decrypt(key, payload),
    }
}
