//! Bounded retry with exponential backoff.
//!
//! The backoff wait is a non-blocking timer raced against the saga's
//! cancellation signal, so a bounded worker pool is never held hostage
//! between attempts and cancellation takes effect without waiting out the
//! delay.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use common::SagaContext;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;

use crate::step::{Step, StepContext, StepResult};

/// Exponential backoff policy: the delay starts at `initial_delay` and
/// doubles after every retry, optionally clamped to `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Option<Duration>,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries after the initial
    /// attempt.
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: None,
        }
    }

    /// Clamps every delay to a ceiling.
    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Derives the policy configured on a step. The step's timeout, when
    /// set, doubles as the delay ceiling.
    pub fn for_step(step: &Step) -> Self {
        Self::new(step.max_retries(), step.initial_retry_delay()).with_max_delay(step.timeout())
    }

    /// Returns the maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the delay before retry number `retry_index` (0-based):
    /// `initial_delay * 2^retry_index`, clamped to the ceiling.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
        let delay = self.initial_delay.saturating_mul(factor);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Resolves when the cancellation flag flips to true; pends forever if the
/// sender side is gone (a dropped handle must not cancel the saga).
pub(crate) async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Returns true if cancellation has been requested.
pub(crate) fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one attempt of the step's executor, converting panics and elapsed
/// timeouts into failure results.
async fn run_attempt(step: &Step, ctx: StepContext) -> StepResult {
    let handler = Arc::clone(step.handler());
    let attempt = AssertUnwindSafe(async move { handler.execute(ctx).await }).catch_unwind();

    let outcome = match step.timeout() {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return StepResult::retryable_failure(format!(
                    "step timed out after {}ms",
                    limit.as_millis()
                ));
            }
        },
        None => attempt.await,
    };

    match outcome {
        Ok(result) => result,
        Err(panic) => {
            StepResult::retryable_failure(format!("step panicked: {}", panic_reason(panic)))
        }
    }
}

/// Runs a step to a terminal outcome: up to `max_retries + 1` attempts with
/// exponential backoff between them.
///
/// A failure is retried only when the step's classifier accepts it and
/// attempts remain. Cancellation during a backoff wait aborts immediately
/// with a final, non-retryable failure.
pub(crate) async fn run_step_with_retry(
    step: &Step,
    saga_context: &Arc<SagaContext>,
    cancel: &mut watch::Receiver<bool>,
) -> StepResult {
    let policy = RetryPolicy::for_step(step);
    let mut retries = 0u32;

    loop {
        let ctx = StepContext::new(step.name(), Arc::clone(saga_context))
            .with_attempt(retries + 1)
            .with_timeout(step.timeout());
        let result = run_attempt(step, ctx).await;

        let failure = match result {
            StepResult::Success { .. } => return result,
            StepResult::Failure(ref failure) => failure.clone(),
        };

        if !step.should_retry(&failure) || retries >= policy.max_retries() {
            return result;
        }

        let delay = policy.delay_for(retries);
        tracing::debug!(
            step = step.name(),
            attempt = retries + 1,
            delay_ms = delay.as_millis() as u64,
            reason = %failure.reason,
            "step failed, backing off before retry"
        );
        metrics::counter!("saga_step_retries_total").increment(1);

        tokio::select! {
            _ = wait_cancelled(cancel) => {
                return StepResult::permanent_failure("saga cancelled during retry backoff");
            }
            _ = tokio::time::sleep(delay) => {}
        }
        retries += 1;
    }
}

/// Runs a step's compensator once, converting panics into failure results.
/// Compensation is single-attempt and best-effort.
pub(crate) async fn run_compensator(step: &Step, ctx: StepContext) -> StepResult {
    let handler = Arc::clone(step.handler());
    let attempt = AssertUnwindSafe(async move { handler.compensate(ctx).await }).catch_unwind();

    match attempt.await {
        Ok(result) => result,
        Err(panic) => StepResult::permanent_failure(format!(
            "compensator panicked: {}",
            panic_reason(panic)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::SagaStep;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct FlakyStep {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl SagaStep for FlakyStep {
        async fn execute(&self, _ctx: StepContext) -> StepResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.succeed_on != 0 && call >= self.succeed_on {
                StepResult::success()
            } else {
                StepResult::retryable_failure("still down")
            }
        }
    }

    struct PanickingStep;

    #[async_trait]
    impl SagaStep for PanickingStep {
        async fn execute(&self, _ctx: StepContext) -> StepResult {
            panic!("executor blew up");
        }
    }

    struct SlowStep;

    #[async_trait]
    impl SagaStep for SlowStep {
        async fn execute(&self, _ctx: StepContext) -> StepResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StepResult::success()
        }
    }

    fn never_cancelled() -> watch::Receiver<bool> {
        // The dropped sender makes wait_cancelled pend forever.
        let (_tx, rx) = watch::channel(false);
        rx
    }

    fn test_context() -> Arc<SagaContext> {
        Arc::new(SagaContext::new("saga-retry"))
    }

    #[test]
    fn delay_doubles_per_retry() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_respects_ceiling() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100))
            .with_max_delay(Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
        assert_eq!(policy.delay_for(10), Duration::from_millis(250));
    }

    #[test]
    fn delay_survives_large_retry_indexes() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(1));
        // 2^40 overflows u32; the factor saturates instead of panicking.
        let delay = policy.delay_for(40);
        assert!(delay >= policy.delay_for(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_doubling_waits() {
        let step = Step::builder(
            "flaky",
            Arc::new(FlakyStep {
                calls: AtomicU32::new(0),
                succeed_on: 4,
            }),
        )
        .max_retries(3)
        .initial_retry_delay(Duration::from_millis(100))
        .build();

        let start = Instant::now();
        let mut cancel = never_cancelled();
        let result = run_step_with_retry(&step, &test_context(), &mut cancel).await;

        assert!(result.is_success());
        // Waits of 100ms + 200ms + 400ms between the four attempts.
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_failure() {
        let flaky = Arc::new(FlakyStep {
            calls: AtomicU32::new(0),
            succeed_on: 0,
        });
        let step = Step::builder("flaky", Arc::clone(&flaky) as Arc<dyn SagaStep>)
            .max_retries(2)
            .initial_retry_delay(Duration::from_millis(10))
            .build();

        let mut cancel = never_cancelled();
        let result = run_step_with_retry(&step, &test_context(), &mut cancel).await;

        assert_eq!(result.failure().unwrap().reason, "still down");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_final_immediately() {
        struct FatalStep(AtomicU32);

        #[async_trait]
        impl SagaStep for FatalStep {
            async fn execute(&self, _ctx: StepContext) -> StepResult {
                self.0.fetch_add(1, Ordering::SeqCst);
                StepResult::permanent_failure("bad request")
            }
        }

        let fatal = Arc::new(FatalStep(AtomicU32::new(0)));
        let step = Step::builder("fatal", Arc::clone(&fatal) as Arc<dyn SagaStep>)
            .max_retries(5)
            .build();

        let mut cancel = never_cancelled();
        let result = run_step_with_retry(&step, &test_context(), &mut cancel).await;

        assert_eq!(result.failure().unwrap().reason, "bad request");
        assert_eq!(fatal.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panic_is_captured_and_retried() {
        let step = Step::builder("panicky", Arc::new(PanickingStep))
            .max_retries(1)
            .initial_retry_delay(Duration::from_millis(1))
            .build();

        let mut cancel = never_cancelled();
        let result = run_step_with_retry(&step, &test_context(), &mut cancel).await;

        let failure = result.failure().unwrap();
        assert!(failure.reason.contains("step panicked"));
        assert!(failure.reason.contains("executor blew up"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_elapses_into_retryable_failure() {
        let step = Step::builder("slow", Arc::new(SlowStep))
            .timeout(Duration::from_millis(50))
            .build();

        let mut cancel = never_cancelled();
        let result = run_step_with_retry(&step, &test_context(), &mut cancel).await;

        assert!(result.failure().unwrap().reason.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_aborts() {
        let flaky = Arc::new(FlakyStep {
            calls: AtomicU32::new(0),
            succeed_on: 0,
        });
        let step = Step::builder("flaky", Arc::clone(&flaky) as Arc<dyn SagaStep>)
            .max_retries(10)
            .initial_retry_delay(Duration::from_secs(3600))
            .build();

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let context = test_context();
        let run = tokio::spawn(async move {
            run_step_with_retry(&step, &context, &mut cancel_rx).await
        });

        // Let the first attempt fail and the backoff wait begin.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel_tx.send_replace(true);

        let result = run.await.unwrap();
        let failure = result.failure().unwrap();
        assert!(failure.reason.contains("cancelled"));
        assert!(!failure.retryable);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compensator_panic_is_captured() {
        struct PanickyCompensation;

        #[async_trait]
        impl SagaStep for PanickyCompensation {
            async fn execute(&self, _ctx: StepContext) -> StepResult {
                StepResult::success()
            }

            async fn compensate(&self, _ctx: StepContext) -> StepResult {
                panic!("undo blew up");
            }

            fn compensable(&self) -> bool {
                true
            }
        }

        let step = Step::builder("undoable", Arc::new(PanickyCompensation)).build();
        let ctx = StepContext::new("undoable", test_context());
        let result = run_compensator(&step, ctx).await;

        assert!(result.failure().unwrap().reason.contains("compensator panicked"));
    }
}
