//! Saga orchestration engine.
//!
//! A central coordinator executes the steps of a [`SagaDefinition`] in
//! order, persisting progress after every step, retrying transient failures
//! with exponential backoff, and unwinding partial failures by invoking
//! compensators over the completed steps in reverse order.
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use saga_engine::{
//!     Orchestrator, SagaContext, SagaDefinition, SagaStep, Step, StepContext, StepResult,
//! };
//! use saga_store::InMemorySagaStore;
//!
//! struct CreateUser;
//!
//! #[async_trait]
//! impl SagaStep for CreateUser {
//!     async fn execute(&self, _ctx: StepContext) -> StepResult {
//!         StepResult::success_with(serde_json::json!({"user_id": "u-1"}))
//!     }
//!
//!     async fn compensate(&self, _ctx: StepContext) -> StepResult {
//!         StepResult::success()
//!     }
//!
//!     fn compensable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn run() -> Result<(), saga_engine::OrchestratorError> {
//! let definition = SagaDefinition::builder("UserRegistrationSaga")
//!     .simple_step("create_user", Arc::new(CreateUser))
//!     .build()?;
//!
//! let store = InMemorySagaStore::new();
//! let orchestrator = Orchestrator::new(store.clone(), store);
//! let result = orchestrator
//!     .execute(&definition, SagaContext::new("saga-1"))
//!     .await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod definition;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod result;
pub mod retry;
pub mod step;

pub use common::{SagaContext, SagaId};
pub use config::RecoveryConfig;
pub use definition::{SagaDefinition, SagaDefinitionBuilder};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{Orchestrator, SagaHandle};
pub use recovery::RecoveryScanner;
pub use result::SagaResult;
pub use retry::RetryPolicy;
pub use saga_store::{SagaInstance, SagaStatus};
pub use step::{SagaStep, Step, StepBuilder, StepContext, StepFailure, StepResult};
