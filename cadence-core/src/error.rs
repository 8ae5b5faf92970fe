//! Error types for cadence-core

use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::types::UserId;

/// Error type for cadence analysis and storage operations
#[derive(Debug, Error)]
pub enum CadenceError {
    /// The attempt window is below the minimum size needed for analysis.
    ///
    /// Not fatal: pipelines exit early with a neutral result.
    #[error("Insufficient data: {available} attempts available, {required} required")]
    InsufficientData { available: usize, required: usize },

    /// The external classifier failed or returned a malformed response
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    /// A concurrent writer updated an upserted row first.
    ///
    /// Callers retry with a fresh read.
    #[error("Persistence conflict on {entity} for user {user_id}")]
    PersistenceConflict {
        user_id: UserId,
        entity: &'static str,
    },

    /// Storage backend failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration is invalid or could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    /// Whether this error only signals a too-small window.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }

    /// Whether this error is a lost compare-and-swap race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::PersistenceConflict { .. })
    }
}

impl From<serde_json::Error> for CadenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;
