use common::SagaId;
use saga_store::{SagaInstance, SagaStatus};
use serde::Serialize;

/// The value returned to the caller when a saga reaches a terminal state.
///
/// Pure return value, never persisted; the durable record is the
/// [`SagaInstance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SagaResult {
    saga_id: SagaId,
    status: SagaStatus,
    error_message: Option<String>,
}

impl SagaResult {
    /// Derives the result from the terminal instance state.
    pub fn from_instance(instance: &SagaInstance) -> Self {
        Self {
            saga_id: instance.id.clone(),
            status: instance.status,
            error_message: instance.failure_reason.clone(),
        }
    }

    /// Returns the saga ID.
    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    /// Returns the terminal status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Returns the failure message, if the saga did not complete.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns true if every step completed.
    pub fn is_success(&self) -> bool {
        self.status == SagaStatus::Completed
    }
}
