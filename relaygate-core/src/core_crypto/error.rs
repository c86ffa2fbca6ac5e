//! Error types for envelope cryptography

use thiserror::Error;

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised while deriving keys or opening payloads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Peer public key or secret key is not usable
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Payload is not valid base64
    #[error("Invalid base64: {0}")]
    InvalidBase64(String),

    /// Payload length outside the accepted range
    #[error("Invalid payload size: {0}")]
    InvalidSize(usize),

    /// Unknown payload version byte
    #[error("Unknown encryption version: {0}")]
    UnknownVersion(u8),

    /// MAC verification failed
    #[error("Invalid MAC")]
    InvalidMac,

    /// Plaintext padding is malformed
    #[error("Invalid padding")]
    InvalidPadding,

    /// Payload does not follow the expected textual format
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Plaintext is empty or too long to encrypt
    #[error("Invalid plaintext length: {0}")]
    InvalidPlaintextLength(usize),

    /// Decrypted bytes are not UTF-8
    #[error("Plaintext is not valid UTF-8")]
    InvalidUtf8,
}
