//! Append-only step execution records.

use chrono::{DateTime, Utc};
use common::{ExecutionId, SagaId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The outcome recorded for one step execution.
///
/// One record is written per step *outcome*, not per retry attempt; retries
/// are internal to a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    /// The step executed successfully.
    Completed,

    /// The step failed terminally (retries exhausted or non-retryable).
    Failed,
}

impl StepStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
        }
    }

    /// Parses a status from its string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Completed" => Some(StepStatus::Completed),
            "Failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of running a step's compensator, persisted on the execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompensationOutcome {
    /// The compensator ran and succeeded.
    Succeeded {
        /// Output produced by the compensator, if any.
        output: Option<Value>,
    },

    /// The compensator ran and failed. The failure is recorded but does not
    /// stop compensation of earlier steps.
    Failed {
        /// Why the compensator failed.
        error: String,
    },
}

impl CompensationOutcome {
    /// Returns true if the compensator succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, CompensationOutcome::Succeeded { .. })
    }
}

/// Durable record of one step outcome within a saga.
///
/// The set of `Completed` executions for a saga is exactly the successfully
/// executed prefix of the definition's steps, in order; reversed, it is the
/// compensation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique ID of this record.
    pub id: ExecutionId,

    /// The saga this execution belongs to.
    pub saga_id: SagaId,

    /// Name of the step, unique within the saga's definition.
    pub step_name: String,

    /// Outcome of the execution.
    pub status: StepStatus,

    /// Output produced by a completed step, made available to its
    /// compensator later.
    pub output: Option<Value>,

    /// Failure reason for a failed step.
    pub error: Option<String>,

    /// When the outcome was recorded.
    pub executed_at: DateTime<Utc>,

    /// When the compensator ran, if it has.
    pub compensated_at: Option<DateTime<Utc>>,

    /// Outcome of the compensator, if it ran.
    pub compensation_result: Option<CompensationOutcome>,
}

impl StepExecution {
    /// Creates a record for a successfully completed step.
    pub fn completed(saga_id: SagaId, step_name: impl Into<String>, output: Option<Value>) -> Self {
        Self {
            id: ExecutionId::new(),
            saga_id,
            step_name: step_name.into(),
            status: StepStatus::Completed,
            output,
            error: None,
            executed_at: Utc::now(),
            compensated_at: None,
            compensation_result: None,
        }
    }

    /// Creates a record for a terminally failed step.
    pub fn failed(saga_id: SagaId, step_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: ExecutionId::new(),
            saga_id,
            step_name: step_name.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
            executed_at: Utc::now(),
            compensated_at: None,
            compensation_result: None,
        }
    }

    /// Returns true if this execution completed and has not been
    /// compensated yet.
    pub fn needs_compensation(&self) -> bool {
        self.status == StepStatus::Completed && self.compensated_at.is_none()
    }
}
