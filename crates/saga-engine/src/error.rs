//! Orchestration error types.

use common::SagaId;
use saga_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the orchestrator.
///
/// Step and compensator failures are never errors; they are recorded as
/// values on the [`SagaResult`](crate::SagaResult) and the persisted
/// records. An `Err` from the orchestrator means the saga could not be
/// started at all, or its bookkeeping could not be persisted.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The context carried an empty saga ID.
    #[error("Saga ID must not be empty")]
    EmptySagaId,

    /// The definition has no steps.
    #[error("Saga definition '{0}' has no steps")]
    EmptyDefinition(String),

    /// Two steps in a definition share a name.
    #[error("Duplicate step name in definition: {0}")]
    DuplicateStepName(String),

    /// A saga with this ID is already executing in this process.
    ///
    /// This is the in-memory duplicate-submission guard; it is best-effort
    /// and not crash-safe.
    #[error("Saga is already running in this process: {0}")]
    AlreadyRunning(SagaId),

    /// An instance with this saga ID already exists in the store.
    #[error("Saga has already been started: {0}")]
    DuplicateSaga(SagaId),

    /// Reading or writing saga state failed. Fatal to this orchestration
    /// attempt; the recovery scanner will flag the stuck instance.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A submitted saga task was aborted or panicked before producing a
    /// result.
    #[error("Saga task failed to complete: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
