//! Error types for the Keeper workspace.

use serde::Serialize;
use thiserror::Error;

/// A shared error type for the entire Keeper workspace.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait. Rollback handling depends on
/// being able to tell validation and integrity failures (handled locally by
/// the fallback search) apart from persistence failures (counted and
/// surfaced), so the variants mirror that taxonomy.
#[derive(Error, Debug, Clone, Serialize)]
pub enum KeeperError {
    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// A candidate snapshot's shape is malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Fingerprint mismatch on a candidate snapshot
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Adapter read/write failure (storage layer)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeeperError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an Integrity error
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    /// Creates a Persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a Validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is an Integrity error
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    /// Check if this is a Persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Check if this error can be absorbed by the rollback fallback search.
    ///
    /// Validation and Integrity failures advance the search to the next
    /// candidate; every other variant must be surfaced to the caller.
    pub fn is_recoverable_candidate_failure(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Integrity(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for KeeperError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(format!("{} (kind: {:?})", err, err.kind()))
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for KeeperError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for KeeperError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Conversion from String (for error messages)
impl From<String> for KeeperError {
    fn from(err: String) -> Self {
        Self::Internal(err)
    }
}

/// A type alias for `Result<T, KeeperError>`.
pub type Result<T> = std::result::Result<T, KeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_helpers() {
        let err = KeeperError::not_found("snapshot", "abc");
        assert!(err.is_not_found());

        let err = KeeperError::persistence("disk full");
        assert!(err.is_persistence());
        assert!(!err.is_recoverable_candidate_failure());
    }

    #[test]
    fn test_recoverable_candidate_failures() {
        assert!(KeeperError::validation("bad shape").is_recoverable_candidate_failure());
        assert!(KeeperError::integrity("mismatch").is_recoverable_candidate_failure());
        assert!(!KeeperError::config("oops").is_recoverable_candidate_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: KeeperError = io_err.into();
        assert!(err.is_persistence());
    }
}
