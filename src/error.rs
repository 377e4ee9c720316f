//! Error types for key-value and document operations.
//!
//! Two layers share one error type:
//! - store level: version_conflict, already_exists, invalid_key, unavailable
//! - collection level: duplicate_key, conflict, allocation_exhausted, invalid_id

use thiserror::Error;

use crate::key::Versionstamp;

/// Errors that can occur during store and collection operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Save with an explicit `_id` that is already taken in the collection.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Every auto-generated id candidate collided with an existing document.
    #[error("id allocation exhausted after {attempts} attempts")]
    AllocationExhausted { attempts: usize },

    /// Document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another writer modified the document between read and write.
    #[error("conflict: {0} was modified concurrently")]
    Conflict(String),

    /// Expected versionstamp does not match the stored one (store-level CAS failure).
    #[error(
        "version conflict on {key}: expected {}, found {}",
        display_stamp(.expected),
        display_stamp(.found)
    )]
    VersionConflict {
        key: String,
        expected: Option<Versionstamp>,
        found: Option<Versionstamp>,
    },

    /// Key already exists (for create_if_not_exists operations).
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// Cannot reach the storage backend, or it has been closed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid key format.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// `_id` is not a string, number or short byte sequence.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    DatabaseError(sqlx::Error),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

fn display_stamp(stamp: &Option<Versionstamp>) -> String {
    match stamp {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}

impl StoreError {
    /// Returns true if retrying the operation with fresh state may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_)
                | StoreError::VersionConflict { .. }
                | StoreError::AllocationExhausted { .. }
        )
    }

    /// Returns true if the backend could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(
            err,
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
        ) {
            return StoreError::StoreUnavailable(err.to_string());
        }
        StoreError::DatabaseError(err)
    }
}
