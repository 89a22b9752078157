// src/utils/errors.rs
//! Engine error types
//!
//! Only construction-time invariant violations are fatal. Parse failures
//! and I/O failures are reported through these variants but callers on the
//! interception path log them and fall back to pass-through.

use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the override engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A `.headers` descriptor could not be parsed or failed validation
    #[error("failed to parse header override descriptor {path}: {reason}")]
    DescriptorParse { path: String, reason: String },

    /// A header override pattern did not compile into a regex
    #[error("invalid override pattern: {0}")]
    InvalidPattern(String),

    /// Resource or response content could not be read
    #[error("content unavailable: {0}")]
    ContentUnavailable(String),

    /// The interception channel rejected a decision or registration
    #[error("interception failed: {0}")]
    InterceptionFailed(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A required collaborator was not supplied at construction time
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_error_message() {
        let err = EngineError::DescriptorParse {
            path: "www.example.com/.headers".to_string(),
            reason: "expected array".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("www.example.com/.headers"));
        assert!(message.contains("expected array"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let err: EngineError = parse.into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
