use shared_types::AgentCandidate;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::adapter::AdapterRegistry;
use super::outcome::{classify, CallError, Outcome};
use crate::retry::{retry_with_backoff, BackoffPolicy};

/// Final outcome of an invocation plus how many calls it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub outcome: Outcome,
    pub attempts: u32,
}

/// Retries transient failures against the same agent, then gives up with a
/// permanent failure so the caller can fall back to another agent.
#[derive(Clone)]
pub struct CapabilityInvoker {
    registry: AdapterRegistry,
    backoff: BackoffPolicy,
    default_timeout: Duration,
}

impl CapabilityInvoker {
    pub fn new(registry: AdapterRegistry, backoff: BackoffPolicy, default_timeout: Duration) -> Self {
        Self {
            registry,
            backoff,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn invoke(
        &self,
        agent: &AgentCandidate,
        input: &serde_json::Value,
        timeout: Duration,
    ) -> Invocation {
        let adapter = match self.registry.resolve(&agent.protocol) {
            Ok(adapter) => adapter,
            Err(err) => {
                return Invocation {
                    outcome: Outcome::PermanentFailure(err.to_string()),
                    attempts: 0,
                }
            }
        };

        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            self.backoff,
            "capability_call",
            |attempt| {
                calls.store(attempt, Ordering::SeqCst);
                let adapter = adapter.clone();
                async move {
                    tracing::debug!(agent_id = %agent.agent_id, attempt, "Invoking capability");
                    match tokio::time::timeout(timeout, adapter.call(agent, input, timeout)).await {
                        Ok(result) => result,
                        Err(_) => Err(CallError::Timeout(timeout.as_millis() as u64)),
                    }
                }
            },
            CallError::is_transient,
        )
        .await;

        let attempts = calls.load(Ordering::SeqCst);
        let outcome = match classify(result.map_err(|failure| failure.error)) {
            // Retries already ran out, so the agent is given up on.
            Outcome::TransientFailure(detail) => Outcome::PermanentFailure(format!(
                "transient failures exhausted after {attempts} attempt(s): {detail}"
            )),
            outcome => outcome,
        };

        if !outcome.is_success() {
            tracing::warn!(agent_id = %agent.agent_id, outcome = ?outcome, "Capability call failed permanently");
        }

        Invocation { outcome, attempts }
    }
}
