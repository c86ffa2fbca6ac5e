//! Error types for envelope wrapping and unwrapping

use crate::core_crypto::CryptoError;
use crate::core_event::EventError;
use thiserror::Error;

/// Result type for envelope operations
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Errors raised while opening or building a wrapped envelope
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Outer event kind does not select a scheme
    #[error("Unknown wrapper kind: {0}")]
    UnknownWrapperKind(u16),

    /// Key derivation or payload decryption failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Decrypted wrapper payload is not an event
    #[error("Malformed seal: {0}")]
    MalformedSeal(String),

    /// Seal id or signature does not verify
    #[error("Invalid seal: {0}")]
    InvalidSeal(String),

    /// Decrypted wrapper payload is not a seal
    #[error("Unexpected seal kind: {0}")]
    UnexpectedSealKind(u16),

    /// Decrypted seal payload is not an event
    #[error("Malformed rumor: {0}")]
    MalformedRumor(String),

    /// Rumor author differs from seal signer
    #[error("Rumor author {rumor} does not match seal signer {seal}")]
    SenderMismatch { seal: String, rumor: String },

    /// Layer exists but is not implemented for this scheme
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Building an event failed
    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

impl EnvelopeError {
    /// Whether this is the "layer not implemented" signal
    pub fn is_unsupported(&self) -> bool {
        matches!(self, EnvelopeError::Unsupported(_))
    }
}
