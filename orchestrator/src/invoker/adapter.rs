use async_trait::async_trait;
use shared_types::AgentCandidate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::http::HttpCapabilityAdapter;
use super::outcome::CallError;

/// A way of calling agents that speak one protocol.
#[async_trait]
pub trait CapabilityAdapter: Send + Sync {
    async fn call(
        &self,
        agent: &AgentCandidate,
        input: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallError>;
}

pub type SharedCapabilityAdapter = Arc<dyn CapabilityAdapter>;

/// Adapters keyed by protocol name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, SharedCapabilityAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding the built-in adapter for each named protocol.
    pub fn from_protocols<S: AsRef<str>>(protocols: &[S]) -> Self {
        let mut registry = Self::new();
        for protocol in protocols {
            let protocol = protocol.as_ref().trim().to_ascii_lowercase();
            match builtin_adapter(&protocol) {
                Some(adapter) => registry.register(protocol, adapter),
                None => tracing::warn!(protocol = %protocol, "No built-in adapter for protocol"),
            }
        }
        registry
    }

    pub fn register(&mut self, protocol: impl Into<String>, adapter: SharedCapabilityAdapter) {
        self.adapters
            .insert(protocol.into().to_ascii_lowercase(), adapter);
    }

    pub fn resolve(&self, protocol: &str) -> Result<SharedCapabilityAdapter, CallError> {
        self.adapters
            .get(&protocol.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| CallError::UnsupportedProtocol(protocol.to_string()))
    }

    pub fn protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

/// In-process adapter that answers every call with the input it was given.
/// Registered as `mock` for local runs without agent backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoCapabilityAdapter;

#[async_trait]
impl CapabilityAdapter for EchoCapabilityAdapter {
    async fn call(
        &self,
        agent: &AgentCandidate,
        input: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value, CallError> {
        Ok(serde_json::json!({
            "agent_id": agent.agent_id,
            "echo": input,
        }))
    }
}

fn builtin_adapter(protocol: &str) -> Option<SharedCapabilityAdapter> {
    match protocol {
        "http" | "https" => Some(Arc::new(HttpCapabilityAdapter::new())),
        "mock" => Some(Arc::new(EchoCapabilityAdapter)),
        _ => None,
    }
}
