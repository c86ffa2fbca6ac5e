//! Error types for the logging subsystem

use thiserror::Error;

/// Errors that can occur in the logging subsystem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    /// A global subscriber could not be installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// Unknown log level name
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::InitializationFailed("already set".to_string());
        assert_eq!(err.to_string(), "Failed to initialize logging: already set");

        let err = LoggingError::InvalidLevel("loud".to_string());
        assert_eq!(err.to_string(), "Invalid log level: loud");
    }
}
