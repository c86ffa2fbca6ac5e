//! Error types for the claim store

use thiserror::Error;

/// Result type for claim store operations
pub type ClaimResult<T> = Result<T, ClaimError>;

/// Claim store errors
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Database error: {0}")]
    Database(String),

    /// A stored identity no longer parses
    #[error("Invalid stored identity: {0}")]
    InvalidIdentity(String),

    #[error("Blocking task failed: {0}")]
    Task(String),

    #[error("Unknown claim type: {0}")]
    UnknownClaimType(String),

    /// Could not find an unused invite code
    #[error("Invite code space exhausted after {0} attempts")]
    InviteCollision(usize),
}

impl From<rusqlite::Error> for ClaimError {
    fn from(e: rusqlite::Error) -> Self {
        ClaimError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for ClaimError {
    fn from(e: r2d2::Error) -> Self {
        ClaimError::Pool(e.to_string())
    }
}
