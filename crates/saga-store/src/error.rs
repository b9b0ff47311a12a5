use common::{ExecutionId, SagaId};
use thiserror::Error;

/// Errors that can occur when reading or writing saga state.
///
/// Store errors are fatal to the orchestration attempt that hit them: the
/// orchestrator never continues a saga whose bookkeeping could not be
/// persisted. Stuck sagas are picked up by the recovery scanner instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An instance with this saga ID already exists.
    #[error("Saga already exists: {0}")]
    DuplicateSaga(SagaId),

    /// No instance exists for this saga ID.
    #[error("Saga instance not found: {0}")]
    InstanceNotFound(SagaId),

    /// No step execution exists with this ID.
    #[error("Step execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// A stored status string did not match any known status.
    #[error("Invalid status value: {0}")]
    InvalidStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
