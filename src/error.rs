//! Error Module
//!
//! Error taxonomy shared by the dispatch pipeline, the confirmation state
//! machine and every plugin boundary. Plugins return these errors directly so
//! the core can hand them back to its caller untouched.

use crate::Bytes32;
use thiserror::Error;
use uuid::Uuid;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required collaborator was not supplied at construction time
    #[error("Missing dependency: {0}")]
    MissingDependency(&'static str),

    /// Payload could not be encoded or a stored record could not be decoded
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message could not be sealed, or a sealed message was altered
    #[error("Seal failed: {0}")]
    Seal(String),

    /// Storage plugin failure (publish rejected, storage unreachable)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Ledger plugin failure (submission rejected, node unreachable)
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Persistence plugin failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// A record with the same identity already exists with different content
    #[error("Hash mismatch for {entity} {id}: stored {stored:?}, received {received:?}")]
    HashMismatch {
        entity: &'static str,
        id: Uuid,
        stored: Bytes32,
        received: Bytes32,
    },

    /// The identity observed on the ledger conflicts with the stored record
    /// of the same name. Checked explicitly by the confirmation state machine.
    #[error("Identity mismatch for {namespace}/{name}: stored {stored:?}, received {received:?}")]
    IdentityMismatch {
        namespace: String,
        name: String,
        stored: Option<Uuid>,
        received: Option<Uuid>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// True for the business-conflict condition raised by token pool upserts
    pub fn is_identity_mismatch(&self) -> bool {
        matches!(self, Error::IdentityMismatch { .. })
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}
