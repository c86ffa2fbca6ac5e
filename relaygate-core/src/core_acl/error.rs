//! Errors raised while assembling the access engine

use crate::config::ConfigError;
use crate::core_backend::BackendError;
use crate::core_claims::ClaimError;
use thiserror::Error;

/// Startup failures; decisions themselves never error
#[derive(Debug, Error)]
pub enum AclError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Claim store unavailable: {0}")]
    Claims(#[from] ClaimError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Failed to prepare data directory: {0}")]
    DataDir(String),
}
