//! The saga orchestrator: sequential step execution with persisted
//! progress, bounded retry and reverse-order compensation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use common::{SagaContext, SagaId};
use saga_store::{
    CompensationOutcome, SagaInstance, SagaInstanceStore, StepExecution, StepExecutionLog,
    StepStatus, StoreError,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::definition::SagaDefinition;
use crate::error::{OrchestratorError, Result};
use crate::result::SagaResult;
use crate::retry::{is_cancelled, run_compensator, run_step_with_retry};
use crate::step::{StepContext, StepResult};

/// In-process registry of actively executing saga IDs.
///
/// A best-effort duplicate-submission guard, not a source of truth: it is
/// lost on process restart, and crash recovery is the recovery scanner's
/// job. Entries are released by the guard's `Drop`, so no exit path can
/// leak one.
#[derive(Clone, Default)]
struct ActiveSagas {
    inner: Arc<Mutex<HashSet<SagaId>>>,
}

impl ActiveSagas {
    fn acquire(&self, id: &SagaId) -> Option<ActiveSagaGuard> {
        let mut active = self.inner.lock().unwrap();
        if active.insert(id.clone()) {
            Some(ActiveSagaGuard {
                id: id.clone(),
                registry: Arc::clone(&self.inner),
            })
        } else {
            None
        }
    }
}

struct ActiveSagaGuard {
    id: SagaId,
    registry: Arc<Mutex<HashSet<SagaId>>>,
}

impl Drop for ActiveSagaGuard {
    fn drop(&mut self) {
        self.registry.lock().unwrap().remove(&self.id);
    }
}

/// Handle to a submitted saga.
///
/// Cancellation is cooperative: it takes effect at step boundaries and
/// during backoff waits, never by interrupting a step executor's in-flight
/// call. Dropping the handle detaches from the saga without cancelling it.
pub struct SagaHandle {
    saga_id: SagaId,
    cancel: watch::Sender<bool>,
    join: JoinHandle<Result<SagaResult>>,
}

impl SagaHandle {
    /// Returns the saga ID.
    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    /// Requests cooperative cancellation. Completed steps are compensated.
    pub fn cancel(&self) {
        // Send fails only if the saga already finished.
        let _ = self.cancel.send(true);
    }

    /// Returns true if the saga task has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the saga to reach a terminal state.
    pub async fn wait(self) -> Result<SagaResult> {
        self.join.await?
    }
}

/// Coordinates saga executions against the instance store and the step
/// execution log.
///
/// Many sagas execute concurrently, each as its own task; within one saga
/// steps are strictly sequential, and step N+1 never starts before step N's
/// outcome is durably persisted.
pub struct Orchestrator<I, L> {
    instances: I,
    log: L,
    active: ActiveSagas,
}

impl<I, L> Orchestrator<I, L>
where
    I: SagaInstanceStore,
    L: StepExecutionLog,
{
    /// Creates a new orchestrator over the given stores.
    pub fn new(instances: I, log: L) -> Self {
        Self {
            instances,
            log,
            active: ActiveSagas::default(),
        }
    }

    /// Executes a saga to a terminal state and returns its result.
    ///
    /// Step and compensator failures are reported through the returned
    /// [`SagaResult`], never as `Err`; an `Err` means the saga could not be
    /// started or its bookkeeping could not be persisted.
    pub async fn execute(
        &self,
        definition: &SagaDefinition,
        context: SagaContext,
    ) -> Result<SagaResult> {
        // Dropped sender: the cancellation signal never fires.
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.execute_with_cancel(definition, context, cancel_rx).await
    }

    /// Spawns a saga execution and returns a handle to it.
    pub fn submit(
        self: &Arc<Self>,
        definition: Arc<SagaDefinition>,
        context: SagaContext,
    ) -> SagaHandle
    where
        I: 'static,
        L: 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let saga_id = context.saga_id().clone();
        let orchestrator = Arc::clone(self);
        let join = tokio::spawn(async move {
            orchestrator
                .execute_with_cancel(&definition, context, cancel_rx)
                .await
        });

        SagaHandle {
            saga_id,
            cancel: cancel_tx,
            join,
        }
    }

    /// Retrieves the persisted state of a saga.
    pub async fn get_status(&self, saga_id: &SagaId) -> Result<Option<SagaInstance>> {
        Ok(self.instances.get(saga_id).await?)
    }

    /// Flags sagas stuck in a non-terminal state past the staleness
    /// threshold. Flagging only; resumption policy is the caller's.
    pub async fn run_recovery_scan(&self, staleness: Duration) -> Result<Vec<SagaId>> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(staleness).unwrap_or(chrono::TimeDelta::MAX);
        let stale = self.instances.find_stale(cutoff).await?;
        for instance in &stale {
            tracing::warn!(
                saga_id = %instance.id,
                saga_type = %instance.saga_type,
                status = %instance.status,
                updated_at = %instance.updated_at,
                "stale saga flagged by recovery scan"
            );
        }
        metrics::counter!("recovery_stale_sagas").increment(stale.len() as u64);
        Ok(stale.into_iter().map(|i| i.id).collect())
    }

    #[tracing::instrument(
        skip_all,
        fields(saga_id = %context.saga_id(), saga_type = definition.saga_type())
    )]
    pub(crate) async fn execute_with_cancel(
        &self,
        definition: &SagaDefinition,
        context: SagaContext,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<SagaResult> {
        metrics::counter!("saga_executions_total").increment(1);
        let started = std::time::Instant::now();
        let result = self.run_saga(definition, context, &mut cancel).await;
        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn run_saga(
        &self,
        definition: &SagaDefinition,
        context: SagaContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<SagaResult> {
        if context.saga_id().is_empty() {
            return Err(OrchestratorError::EmptySagaId);
        }

        let _guard = self
            .active
            .acquire(context.saga_id())
            .ok_or_else(|| OrchestratorError::AlreadyRunning(context.saga_id().clone()))?;

        let shared_context = Arc::new(context.clone());
        let mut instance = SagaInstance::new(definition.saga_type(), context);
        self.instances.create(&instance).await.map_err(|e| match e {
            StoreError::DuplicateSaga(id) => OrchestratorError::DuplicateSaga(id),
            other => OrchestratorError::Store(other),
        })?;
        tracing::info!("saga started");

        for step in definition.steps() {
            if is_cancelled(cancel) {
                tracing::warn!(step = step.name(), "saga cancelled before step");
                return self
                    .fail_and_compensate(
                        definition,
                        instance,
                        &shared_context,
                        step.name(),
                        "saga cancelled".to_string(),
                    )
                    .await;
            }

            tracing::info!(step = step.name(), "saga step started");
            match run_step_with_retry(step, &shared_context, cancel).await {
                StepResult::Success { output } => {
                    self.log
                        .append(&StepExecution::completed(
                            instance.id.clone(),
                            step.name(),
                            output,
                        ))
                        .await?;
                    instance.advance_to(step.name());
                    self.instances.update(&instance).await?;
                }
                StepResult::Failure(failure) => {
                    self.log
                        .append(&StepExecution::failed(
                            instance.id.clone(),
                            step.name(),
                            failure.reason.clone(),
                        ))
                        .await?;
                    return self
                        .fail_and_compensate(
                            definition,
                            instance,
                            &shared_context,
                            step.name(),
                            failure.reason,
                        )
                        .await;
                }
            }
        }

        instance.complete();
        self.instances.update(&instance).await?;
        metrics::counter!("saga_completed").increment(1);
        tracing::info!("saga completed successfully");
        Ok(SagaResult::from_instance(&instance))
    }

    /// Unwinds a failed saga: compensates every completed step in reverse
    /// execution order, best-effort, and records the terminal status.
    async fn fail_and_compensate(
        &self,
        definition: &SagaDefinition,
        mut instance: SagaInstance,
        shared_context: &Arc<SagaContext>,
        failed_step: &str,
        reason: String,
    ) -> Result<SagaResult> {
        let completed: Vec<StepExecution> = self
            .log
            .find_by_saga(&instance.id)
            .await?
            .into_iter()
            .filter(|e| e.status == StepStatus::Completed)
            .collect();

        if completed.is_empty() {
            instance.fail(failed_step, &reason);
            self.instances.update(&instance).await?;
            metrics::counter!("saga_failed").increment(1);
            tracing::warn!(step = failed_step, reason = %reason, "saga failed, nothing to compensate");
            return Ok(SagaResult::from_instance(&instance));
        }

        instance.begin_compensation(failed_step, &reason);
        self.instances.update(&instance).await?;
        tracing::warn!(step = failed_step, reason = %reason, "saga step failed, compensating completed steps");

        let mut all_succeeded = true;
        for execution in completed.iter().rev() {
            let Some(step) = definition.step(&execution.step_name) else {
                tracing::warn!(
                    step = %execution.step_name,
                    "completed execution has no step in definition, skipping compensation"
                );
                continue;
            };
            if !step.compensable() {
                continue;
            }

            let ctx = StepContext::new(step.name(), Arc::clone(shared_context))
                .with_step_output(execution.output.clone());
            let outcome = match run_compensator(step, ctx).await {
                StepResult::Success { output } => {
                    tracing::info!(step = step.name(), "compensation step completed");
                    CompensationOutcome::Succeeded { output }
                }
                StepResult::Failure(failure) => {
                    all_succeeded = false;
                    tracing::error!(
                        step = step.name(),
                        reason = %failure.reason,
                        "compensation step failed, continuing with earlier steps"
                    );
                    CompensationOutcome::Failed {
                        error: failure.reason,
                    }
                }
            };
            self.log
                .record_compensation(execution.id, &outcome, Utc::now())
                .await?;
        }

        instance.finish_compensation(all_succeeded);
        self.instances.update(&instance).await?;
        if all_succeeded {
            metrics::counter!("saga_compensated").increment(1);
            tracing::warn!(reason = %instance.failure_reason.as_deref().unwrap_or_default(), "saga compensated");
        } else {
            metrics::counter!("saga_compensation_failed").increment(1);
            tracing::error!("saga compensation failed, manual intervention may be required");
        }
        Ok(SagaResult::from_instance(&instance))
    }
}
