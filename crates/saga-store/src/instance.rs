//! The durable saga instance record and its status machine.

use chrono::{DateTime, Utc};
use common::{SagaContext, SagaId};
use serde::{Deserialize, Serialize};

/// The status of a saga instance in its lifecycle.
///
/// Status transitions:
/// ```text
/// Started ──► InProgress ──┬──► Completed
///    │            │        └──► Compensating ──┬──► Compensated
///    │            │                            └──► CompensationFailed
///    └────────────┴──► Failed
/// ```
///
/// `Failed` is reached when the first step fails before any step has
/// completed, so there is nothing to compensate. Terminal instances are
/// never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Instance persisted, no step outcome recorded yet.
    Started,

    /// At least one step has completed and more remain.
    InProgress,

    /// A step failed and compensating actions are running.
    Compensating,

    /// All steps completed successfully (terminal).
    Completed,

    /// The saga failed with no completed steps to compensate (terminal).
    Failed,

    /// Every compensator that ran succeeded (terminal).
    Compensated,

    /// At least one compensator failed; manual intervention may be
    /// required (terminal).
    CompensationFailed,
}

impl SagaStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed
                | SagaStatus::Failed
                | SagaStatus::Compensated
                | SagaStatus::CompensationFailed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "Started",
            SagaStatus::InProgress => "InProgress",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::CompensationFailed => "CompensationFailed",
        }
    }

    /// Parses a status from its string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Started" => Some(SagaStatus::Started),
            "InProgress" => Some(SagaStatus::InProgress),
            "Compensating" => Some(SagaStatus::Compensating),
            "Completed" => Some(SagaStatus::Completed),
            "Failed" => Some(SagaStatus::Failed),
            "Compensated" => Some(SagaStatus::Compensated),
            "CompensationFailed" => Some(SagaStatus::CompensationFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of a single saga's state, keyed by saga ID.
///
/// Owned exclusively by the orchestrator; external code reads instances via
/// the store but never writes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    /// Caller-supplied saga ID.
    pub id: SagaId,

    /// The saga type name from the definition (e.g. "UserRegistrationSaga").
    pub saga_type: String,

    /// Current lifecycle status.
    pub status: SagaStatus,

    /// Snapshot of the context the saga was started with.
    pub context: SagaContext,

    /// Name of the most recently executed step, if any.
    pub current_step: Option<String>,

    /// When the instance was created.
    pub created_at: DateTime<Utc>,

    /// When the instance was last written. Drives staleness detection.
    pub updated_at: DateTime<Utc>,

    /// When the saga reached `Completed`, if it did.
    pub completed_at: Option<DateTime<Utc>>,

    /// Why the saga failed, if it did.
    pub failure_reason: Option<String>,
}

impl SagaInstance {
    /// Creates a new instance in `Started` for the given definition type
    /// and context.
    pub fn new(saga_type: impl Into<String>, context: SagaContext) -> Self {
        let now = Utc::now();
        Self {
            id: context.saga_id().clone(),
            saga_type: saga_type.into(),
            status: SagaStatus::Started,
            context,
            current_step: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure_reason: None,
        }
    }

    /// Records a completed step, moving the instance to `InProgress`.
    pub fn advance_to(&mut self, step_name: impl Into<String>) {
        self.status = SagaStatus::InProgress;
        self.current_step = Some(step_name.into());
        self.updated_at = Utc::now();
    }

    /// Marks the start of compensation after a step failure.
    pub fn begin_compensation(&mut self, failed_step: impl Into<String>, reason: impl Into<String>) {
        self.status = SagaStatus::Compensating;
        self.current_step = Some(failed_step.into());
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Marks the saga as successfully completed.
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.status = SagaStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Marks the saga as failed with nothing to compensate.
    pub fn fail(&mut self, failed_step: impl Into<String>, reason: impl Into<String>) {
        self.status = SagaStatus::Failed;
        self.current_step = Some(failed_step.into());
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Records the compensation outcome as the terminal status.
    pub fn finish_compensation(&mut self, all_succeeded: bool) {
        self.status = if all_succeeded {
            SagaStatus::Compensated
        } else {
            SagaStatus::CompensationFailed
        };
        self.updated_at = Utc::now();
    }

    /// Returns true if the instance is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_instance() -> SagaInstance {
        SagaInstance::new("TestSaga", SagaContext::new("saga-1"))
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SagaStatus::Started.is_terminal());
        assert!(!SagaStatus::InProgress.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
        assert!(SagaStatus::CompensationFailed.is_terminal());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            SagaStatus::Started,
            SagaStatus::InProgress,
            SagaStatus::Compensating,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensated,
            SagaStatus::CompensationFailed,
        ] {
            assert_eq!(SagaStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SagaStatus::parse("Bogus"), None);
    }

    #[test]
    fn test_new_instance_starts_clean() {
        let instance = make_instance();
        assert_eq!(instance.id.as_str(), "saga-1");
        assert_eq!(instance.status, SagaStatus::Started);
        assert!(instance.current_step.is_none());
        assert!(instance.completed_at.is_none());
        assert!(instance.failure_reason.is_none());
        assert!(!instance.is_terminal());
    }

    #[test]
    fn test_advance_and_complete() {
        let mut instance = make_instance();
        instance.advance_to("create_user");
        assert_eq!(instance.status, SagaStatus::InProgress);
        assert_eq!(instance.current_step.as_deref(), Some("create_user"));

        instance.complete();
        assert_eq!(instance.status, SagaStatus::Completed);
        assert!(instance.completed_at.is_some());
        assert!(instance.is_terminal());
    }

    #[test]
    fn test_compensation_lifecycle() {
        let mut instance = make_instance();
        instance.advance_to("create_user");
        instance.begin_compensation("send_email", "smtp unavailable");
        assert_eq!(instance.status, SagaStatus::Compensating);
        assert_eq!(instance.failure_reason.as_deref(), Some("smtp unavailable"));

        instance.finish_compensation(true);
        assert_eq!(instance.status, SagaStatus::Compensated);

        let mut other = make_instance();
        other.begin_compensation("send_email", "smtp unavailable");
        other.finish_compensation(false);
        assert_eq!(other.status, SagaStatus::CompensationFailed);
    }

    #[test]
    fn test_fail_without_completed_steps() {
        let mut instance = make_instance();
        instance.fail("create_user", "db down");
        assert_eq!(instance.status, SagaStatus::Failed);
        assert_eq!(instance.current_step.as_deref(), Some("create_user"));
        assert!(instance.is_terminal());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut instance = make_instance();
        instance.advance_to("create_user");

        let json = serde_json::to_string(&instance).unwrap();
        let deserialized: SagaInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.id, instance.id);
        assert_eq!(deserialized.status, SagaStatus::InProgress);
        assert_eq!(deserialized.current_step.as_deref(), Some("create_user"));
    }
}
