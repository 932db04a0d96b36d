//! Error types for the short-term memory service

use thiserror::Error;

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {

    // =============================
    // Infrastructure (transient)
    // =============================

    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Summarizer unavailable: {0}")]
    SummarizerUnavailable(String),

    #[error("Session {session_id} changed during compaction (expected version {expected}, found {found})")]
    VersionConflict {
        session_id: String,
        expected: u64,
        found: u64,
    },

    // =============================
    // Data / caller errors
    // =============================

    #[error("Corrupt record under {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl MemoryError {
    /// Infrastructure failures a caller may retry, as opposed to logic bugs
    /// or rejected input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MemoryError::StoreUnavailable(_)
                | MemoryError::SummarizerUnavailable(_)
                | MemoryError::VersionConflict { .. }
        )
    }

    pub fn corrupt(key: impl Into<String>, reason: impl ToString) -> Self {
        MemoryError::CorruptRecord {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<redis::RedisError> for MemoryError {
    fn from(err: redis::RedisError) -> Self {
        MemoryError::StoreUnavailable(format!("redis: {}", err))
    }
}
