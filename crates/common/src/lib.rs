pub mod context;
pub mod ids;

pub use context::SagaContext;
pub use ids::{ExecutionId, SagaId};
