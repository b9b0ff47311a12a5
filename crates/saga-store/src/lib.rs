//! Durable state for the saga orchestration engine.
//!
//! This crate defines the persistence port consumed by the orchestrator:
//! the [`SagaInstanceStore`] holding the current state of each saga, and the
//! append-only [`StepExecutionLog`] recording every step outcome for
//! compensation and audit. Two implementations are provided: an in-memory
//! store for tests and embedded use, and a PostgreSQL store.

pub mod error;
pub mod execution;
pub mod instance;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{ExecutionId, SagaContext, SagaId};
pub use error::{Result, StoreError};
pub use execution::{CompensationOutcome, StepExecution, StepStatus};
pub use instance::{SagaInstance, SagaStatus};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use store::{SagaInstanceStore, StepExecutionLog};
