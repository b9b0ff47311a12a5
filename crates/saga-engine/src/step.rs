//! The step contract: the unit of work a saga is composed of.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{SagaContext, SagaId};
use serde_json::Value;

/// A step failure, carrying the reason and whether the step considers the
/// failure transient.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// Human-readable reason for the failure.
    pub reason: String,

    /// Whether the failure is worth retrying. A step's
    /// [`retry classifier`](Step::should_retry) may override this.
    pub retryable: bool,
}

/// Outcome of executing a step or a compensator.
///
/// Failures are values, never panics or errors: the orchestrator converts
/// everything a step does — including panics — into a `StepResult`, so a
/// single step's fault can never escape the saga boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// The step succeeded, optionally producing output that is persisted on
    /// the execution record and handed to the compensator later.
    Success {
        /// Output of the step, if any.
        output: Option<Value>,
    },

    /// The step failed.
    Failure(StepFailure),
}

impl StepResult {
    /// A successful result with no output.
    pub fn success() -> Self {
        StepResult::Success { output: None }
    }

    /// A successful result carrying output.
    pub fn success_with(output: Value) -> Self {
        StepResult::Success {
            output: Some(output),
        }
    }

    /// A failure worth retrying (e.g. a timeout or an unavailable
    /// downstream service).
    pub fn retryable_failure(reason: impl Into<String>) -> Self {
        StepResult::Failure(StepFailure {
            reason: reason.into(),
            retryable: true,
        })
    }

    /// A failure that must not be retried (e.g. a validation error).
    pub fn permanent_failure(reason: impl Into<String>) -> Self {
        StepResult::Failure(StepFailure {
            reason: reason.into(),
            retryable: false,
        })
    }

    /// Returns true if the result is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Success { .. })
    }

    /// Returns the failure, if the result is one.
    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            StepResult::Success { .. } => None,
            StepResult::Failure(failure) => Some(failure),
        }
    }
}

/// Everything a step sees when it runs.
///
/// The saga context is passed explicitly through every call — the engine
/// never relies on ambient or task-local state. For compensators,
/// `step_output` carries the output the original execution recorded.
#[derive(Debug, Clone)]
pub struct StepContext {
    saga_id: SagaId,
    step_name: String,
    context: Arc<SagaContext>,
    attempt: u32,
    timeout: Option<Duration>,
    step_output: Option<Value>,
}

impl StepContext {
    /// Creates a context for the first attempt of a step.
    pub fn new(step_name: impl Into<String>, context: Arc<SagaContext>) -> Self {
        Self {
            saga_id: context.saga_id().clone(),
            step_name: step_name.into(),
            context,
            attempt: 1,
            timeout: None,
            step_output: None,
        }
    }

    /// Sets the attempt counter (1-based).
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attaches the original execution's output, for compensators.
    pub fn with_step_output(mut self, output: Option<Value>) -> Self {
        self.step_output = output;
        self
    }

    /// Returns the saga ID.
    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    /// Returns the step name.
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Returns the saga context.
    pub fn context(&self) -> &SagaContext {
        &self.context
    }

    /// Returns the attempt counter (1 for the initial attempt).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the per-attempt timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the original execution's output. Only set for compensators.
    pub fn step_output(&self) -> Option<&Value> {
        self.step_output.as_ref()
    }
}

/// The work behind a step: an executor and an optional compensator.
///
/// Implementations own the idempotency of both actions; the engine retries
/// executors and guarantees at-least-once invocation of compensators for
/// completed steps.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Executes the step's forward action.
    async fn execute(&self, ctx: StepContext) -> StepResult;

    /// Undoes a previously completed execution of this step.
    ///
    /// Only invoked when [`compensable`](Self::compensable) returns true;
    /// steps with a compensating action must override both methods.
    async fn compensate(&self, _ctx: StepContext) -> StepResult {
        StepResult::success()
    }

    /// Whether this step has a compensating action.
    fn compensable(&self) -> bool {
        false
    }
}

type RetryClassifier = Arc<dyn Fn(&StepFailure) -> bool + Send + Sync>;

/// A named step within a saga definition, with its retry configuration.
#[derive(Clone)]
pub struct Step {
    name: String,
    handler: Arc<dyn SagaStep>,
    max_retries: u32,
    initial_retry_delay: Duration,
    timeout: Option<Duration>,
    retry_classifier: Option<RetryClassifier>,
}

impl Step {
    /// Starts building a step with the given name and handler.
    pub fn builder(name: impl Into<String>, handler: Arc<dyn SagaStep>) -> StepBuilder {
        StepBuilder {
            step: Step {
                name: name.into(),
                handler,
                max_retries: 0,
                initial_retry_delay: Duration::from_millis(100),
                timeout: None,
                retry_classifier: None,
            },
        }
    }

    /// Returns the step name, unique within its definition.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the step handler.
    pub fn handler(&self) -> &Arc<dyn SagaStep> {
        &self.handler
    }

    /// Returns the maximum number of retries after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the delay before the first retry; it doubles after every
    /// subsequent retry.
    pub fn initial_retry_delay(&self) -> Duration {
        self.initial_retry_delay
    }

    /// Returns the per-attempt timeout, if configured. Also caps the
    /// backoff delay.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns true if this step has a compensating action.
    pub fn compensable(&self) -> bool {
        self.handler.compensable()
    }

    /// Decides whether a failure should be retried, consulting the step's
    /// classifier if one is set and the failure's own flag otherwise.
    pub fn should_retry(&self, failure: &StepFailure) -> bool {
        match &self.retry_classifier {
            Some(classifier) => classifier(failure),
            None => failure.retryable,
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("initial_retry_delay", &self.initial_retry_delay)
            .field("timeout", &self.timeout)
            .field("compensable", &self.compensable())
            .finish()
    }
}

/// Builder for [`Step`].
pub struct StepBuilder {
    step: Step,
}

impl StepBuilder {
    /// Sets the maximum number of retries after the initial attempt.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.step.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    pub fn initial_retry_delay(mut self, delay: Duration) -> Self {
        self.step.initial_retry_delay = delay;
        self
    }

    /// Sets the per-attempt timeout; it also caps the backoff delay.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.step.timeout = Some(timeout);
        self
    }

    /// Overrides the retryability decision for failures of this step.
    pub fn retry_classifier(
        mut self,
        classifier: impl Fn(&StepFailure) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.step.retry_classifier = Some(Arc::new(classifier));
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Step {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopStep;

    #[async_trait]
    impl SagaStep for NoopStep {
        async fn execute(&self, _ctx: StepContext) -> StepResult {
            StepResult::success()
        }
    }

    #[test]
    fn step_result_accessors() {
        assert!(StepResult::success().is_success());
        assert!(StepResult::success_with(serde_json::json!(1)).is_success());

        let retryable = StepResult::retryable_failure("busy");
        let failure = retryable.failure().unwrap();
        assert!(failure.retryable);
        assert_eq!(failure.reason, "busy");

        let permanent = StepResult::permanent_failure("bad input");
        assert!(!permanent.failure().unwrap().retryable);
    }

    #[test]
    fn step_builder_defaults() {
        let step = Step::builder("noop", Arc::new(NoopStep)).build();
        assert_eq!(step.name(), "noop");
        assert_eq!(step.max_retries(), 0);
        assert_eq!(step.initial_retry_delay(), Duration::from_millis(100));
        assert!(step.timeout().is_none());
        assert!(!step.compensable());
    }

    #[test]
    fn should_retry_defaults_to_failure_flag() {
        let step = Step::builder("noop", Arc::new(NoopStep)).build();
        assert!(step.should_retry(&StepFailure {
            reason: "busy".into(),
            retryable: true,
        }));
        assert!(!step.should_retry(&StepFailure {
            reason: "bad".into(),
            retryable: false,
        }));
    }

    #[test]
    fn classifier_overrides_failure_flag() {
        let step = Step::builder("noop", Arc::new(NoopStep))
            .retry_classifier(|failure| failure.reason.contains("transient"))
            .build();
        assert!(step.should_retry(&StepFailure {
            reason: "transient glitch".into(),
            retryable: false,
        }));
        assert!(!step.should_retry(&StepFailure {
            reason: "busy".into(),
            retryable: true,
        }));
    }

    #[test]
    fn step_context_carries_saga_context() {
        let ctx = Arc::new(
            SagaContext::new("saga-1")
                .with_tenant_id("tenant-a")
                .with_payload("k", serde_json::json!("v")),
        );
        let step_ctx = StepContext::new("create_user", ctx)
            .with_attempt(3)
            .with_timeout(Some(Duration::from_secs(5)))
            .with_step_output(Some(serde_json::json!("out")));

        assert_eq!(step_ctx.saga_id().as_str(), "saga-1");
        assert_eq!(step_ctx.step_name(), "create_user");
        assert_eq!(step_ctx.context().tenant_id(), Some("tenant-a"));
        assert_eq!(step_ctx.attempt(), 3);
        assert_eq!(step_ctx.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(step_ctx.step_output(), Some(&serde_json::json!("out")));
    }
}
