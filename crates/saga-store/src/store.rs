use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ExecutionId, SagaId};

use crate::{CompensationOutcome, Result, SagaInstance, SagaStatus, StepExecution};

/// Durable store for saga instances, keyed by saga ID.
///
/// All writes are scoped to a single saga ID, so implementations need no
/// cross-saga coordination. Implementations must be thread-safe
/// (Send + Sync).
#[async_trait]
pub trait SagaInstanceStore: Send + Sync {
    /// Persists a new instance.
    ///
    /// Fails with `StoreError::DuplicateSaga` if an instance with the same
    /// ID already exists.
    async fn create(&self, instance: &SagaInstance) -> Result<()>;

    /// Overwrites an existing instance.
    ///
    /// Fails with `StoreError::InstanceNotFound` if no instance with this
    /// ID exists.
    async fn update(&self, instance: &SagaInstance) -> Result<()>;

    /// Retrieves an instance by saga ID.
    async fn get(&self, id: &SagaId) -> Result<Option<SagaInstance>>;

    /// Retrieves all instances with the given status.
    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaInstance>>;

    /// Retrieves non-terminal instances last updated before `older_than`.
    ///
    /// Only instances in `Started`, `InProgress` or `Compensating` are
    /// candidates; terminal instances are excluded regardless of age.
    /// Results are ordered by `updated_at` ascending (stalest first).
    async fn find_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<SagaInstance>>;
}

/// Append-only log of step outcomes.
///
/// Records are written once per step outcome and only ever touched again to
/// attach a compensation result.
#[async_trait]
pub trait StepExecutionLog: Send + Sync {
    /// Appends a step execution record.
    async fn append(&self, execution: &StepExecution) -> Result<()>;

    /// Retrieves all executions for a saga, ordered by `executed_at`
    /// ascending (execution order).
    async fn find_by_saga(&self, saga_id: &SagaId) -> Result<Vec<StepExecution>>;

    /// Attaches a compensation outcome to an existing execution record.
    ///
    /// Fails with `StoreError::ExecutionNotFound` if no record with this ID
    /// exists.
    async fn record_compensation(
        &self,
        id: ExecutionId,
        outcome: &CompensationOutcome,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Retrieves completed executions that have not been compensated, for
    /// sagas whose compensation did not finish cleanly.
    ///
    /// Surfaces work left behind by crashes or compensator failures; the
    /// engine itself drives compensation from `find_by_saga`.
    async fn find_needing_compensation(&self) -> Result<Vec<StepExecution>>;
}
