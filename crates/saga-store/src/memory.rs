use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ExecutionId, SagaId};
use tokio::sync::RwLock;

use crate::{
    CompensationOutcome, Result, SagaInstance, SagaStatus, StepExecution, StoreError,
    store::{SagaInstanceStore, StepExecutionLog},
};

/// In-memory store implementing both the instance store and the step
/// execution log.
///
/// Provides the same interface and semantics as the PostgreSQL
/// implementation; intended for tests and embedded use. Clones share the
/// same underlying state.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    instances: Arc<RwLock<HashMap<SagaId, SagaInstance>>>,
    executions: Arc<RwLock<Vec<StepExecution>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemorySagaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every subsequent write to fail with a database error.
    ///
    /// Used in tests to exercise persistence-failure propagation.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored instances.
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Returns the number of stored step executions.
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Clears all instances and executions.
    pub async fn clear(&self) {
        self.instances.write().await.clear();
        self.executions.write().await.clear();
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::Io(
                std::io::Error::other("simulated write failure"),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SagaInstanceStore for InMemorySagaStore {
    async fn create(&self, instance: &SagaInstance) -> Result<()> {
        self.check_writable()?;
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(StoreError::DuplicateSaga(instance.id.clone()));
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn update(&self, instance: &SagaInstance) -> Result<()> {
        self.check_writable()?;
        let mut instances = self.instances.write().await;
        if !instances.contains_key(&instance.id) {
            return Err(StoreError::InstanceNotFound(instance.id.clone()));
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get(&self, id: &SagaId) -> Result<Option<SagaInstance>> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaInstance>> {
        let instances = self.instances.read().await;
        let mut found: Vec<_> = instances
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|i| i.updated_at);
        Ok(found)
    }

    async fn find_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<SagaInstance>> {
        let instances = self.instances.read().await;
        let mut found: Vec<_> = instances
            .values()
            .filter(|i| !i.status.is_terminal() && i.updated_at < older_than)
            .cloned()
            .collect();
        found.sort_by_key(|i| i.updated_at);
        Ok(found)
    }
}

#[async_trait]
impl StepExecutionLog for InMemorySagaStore {
    async fn append(&self, execution: &StepExecution) -> Result<()> {
        self.check_writable()?;
        self.executions.write().await.push(execution.clone());
        Ok(())
    }

    async fn find_by_saga(&self, saga_id: &SagaId) -> Result<Vec<StepExecution>> {
        let executions = self.executions.read().await;
        let mut found: Vec<_> = executions
            .iter()
            .filter(|e| &e.saga_id == saga_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        found.sort_by_key(|e| e.executed_at);
        Ok(found)
    }

    async fn record_compensation(
        &self,
        id: ExecutionId,
        outcome: &CompensationOutcome,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        let mut executions = self.executions.write().await;
        let execution = executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::ExecutionNotFound(id))?;
        execution.compensated_at = Some(at);
        execution.compensation_result = Some(outcome.clone());
        Ok(())
    }

    async fn find_needing_compensation(&self) -> Result<Vec<StepExecution>> {
        let instances = self.instances.read().await;
        let executions = self.executions.read().await;
        let mut found: Vec<_> = executions
            .iter()
            .filter(|e| {
                e.needs_compensation()
                    && instances.get(&e.saga_id).is_some_and(|i| {
                        matches!(
                            i.status,
                            SagaStatus::Compensating | SagaStatus::CompensationFailed
                        )
                    })
            })
            .cloned()
            .collect();
        found.sort_by_key(|e| e.executed_at);
        Ok(found)
    }
}
