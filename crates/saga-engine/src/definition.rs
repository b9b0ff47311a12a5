//! Saga definitions: an ordered list of steps under a type name.

use std::sync::Arc;

use crate::error::OrchestratorError;
use crate::step::{SagaStep, Step, StepBuilder};

/// An immutable, ordered list of steps under a saga type name.
///
/// Constructed once by the calling business code and shared across every
/// execution of the same saga type. Step names are unique within a
/// definition; they key both compensation lookup and the execution log.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    saga_type: String,
    steps: Vec<Step>,
}

impl SagaDefinition {
    /// Starts building a definition with the given type name.
    pub fn builder(saga_type: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            saga_type: saga_type.into(),
            steps: Vec::new(),
        }
    }

    /// Returns the saga type name (e.g. "UserRegistrationSaga").
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Returns the steps in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Looks up a step by name.
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name() == name)
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the definition has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builder for [`SagaDefinition`].
pub struct SagaDefinitionBuilder {
    saga_type: String,
    steps: Vec<Step>,
}

impl SagaDefinitionBuilder {
    /// Appends a fully configured step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a step built with default retry configuration.
    pub fn simple_step(self, name: impl Into<String>, handler: Arc<dyn SagaStep>) -> Self {
        self.step(Step::builder(name, handler).build())
    }

    /// Appends a step, handing the builder to a closure for configuration.
    pub fn step_with(
        self,
        name: impl Into<String>,
        handler: Arc<dyn SagaStep>,
        configure: impl FnOnce(StepBuilder) -> StepBuilder,
    ) -> Self {
        self.step(configure(Step::builder(name, handler)).build())
    }

    /// Validates and finishes the definition.
    ///
    /// Fails if the definition has no steps or two steps share a name.
    pub fn build(self) -> Result<SagaDefinition, OrchestratorError> {
        if self.steps.is_empty() {
            return Err(OrchestratorError::EmptyDefinition(self.saga_type));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if self.steps[..i].iter().any(|s| s.name() == step.name()) {
                return Err(OrchestratorError::DuplicateStepName(step.name().to_string()));
            }
        }
        Ok(SagaDefinition {
            saga_type: self.saga_type,
            steps: self.steps,
        })
    }
}
