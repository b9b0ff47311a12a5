use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::SagaId;

/// Correlation and business payload carried through every step of a saga.
///
/// The context is built once by the caller and is immutable for the lifetime
/// of the saga; the orchestrator snapshots it into the persisted instance.
/// Steps read from it, they never write to it — data produced by a step is
/// recorded on its step execution instead.
///
/// The payload map preserves insertion order (serde_json `preserve_order`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaContext {
    saga_id: SagaId,
    tenant_id: Option<String>,
    user_id: Option<String>,
    correlation_id: Option<String>,
    payload: Map<String, Value>,
}

impl SagaContext {
    /// Creates a context for the given saga ID with an empty payload.
    pub fn new(saga_id: impl Into<SagaId>) -> Self {
        Self {
            saga_id: saga_id.into(),
            tenant_id: None,
            user_id: None,
            correlation_id: None,
            payload: Map::new(),
        }
    }

    /// Sets the tenant ID.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the user ID.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Adds a payload entry.
    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Returns the saga ID.
    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    /// Returns the tenant ID, if set.
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Returns the user ID, if set.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Returns a payload value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Returns the full payload map.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_builder_sets_all_fields() {
        let ctx = SagaContext::new("saga-1")
            .with_tenant_id("tenant-a")
            .with_user_id("user-7")
            .with_correlation_id("corr-99")
            .with_payload("email", json!("a@example.com"));

        assert_eq!(ctx.saga_id().as_str(), "saga-1");
        assert_eq!(ctx.tenant_id(), Some("tenant-a"));
        assert_eq!(ctx.user_id(), Some("user-7"));
        assert_eq!(ctx.correlation_id(), Some("corr-99"));
        assert_eq!(ctx.get("email"), Some(&json!("a@example.com")));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn payload_preserves_insertion_order() {
        let ctx = SagaContext::new("saga-1")
            .with_payload("z", json!(1))
            .with_payload("a", json!(2))
            .with_payload("m", json!(3));

        let keys: Vec<&String> = ctx.payload().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn context_serialization_roundtrip() {
        let ctx = SagaContext::new("saga-1")
            .with_tenant_id("tenant-a")
            .with_payload("plan", json!("premium"));

        let json = serde_json::to_string(&ctx).unwrap();
        let deserialized: SagaContext = serde_json::from_str(&json).unwrap();
        assert_eq!(ctx, deserialized);
    }
}
