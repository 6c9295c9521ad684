use async_trait::async_trait;
use reqwest::Client;
use shared_types::AgentCandidate;
use std::time::Duration;

use super::adapter::CapabilityAdapter;
use super::outcome::CallError;

/// POSTs `{"agent_id", "input"}` as JSON to the agent's endpoint.
///
/// A JSON object carrying `"output"` yields that value; one carrying
/// `"declined"` or `"error"` is a declared incapability.
#[derive(Debug, Clone, Default)]
pub struct HttpCapabilityAdapter {
    client: Client,
}

impl HttpCapabilityAdapter {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

fn interpret_body(body: &str) -> Result<serde_json::Value, CallError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| CallError::Malformed(format!("{e}: {}", truncate(body, 200))))?;

    if let Some(obj) = value.as_object() {
        for key in ["declined", "error"] {
            if let Some(reason) = obj.get(key).filter(|v| !v.is_null() && *v != &serde_json::Value::Bool(false)) {
                let reason = reason
                    .as_str()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| reason.to_string());
                return Err(CallError::Declined(reason));
            }
        }
        if let Some(output) = obj.get("output") {
            return Ok(output.clone());
        }
    }
    Ok(value)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl CapabilityAdapter for HttpCapabilityAdapter {
    async fn call(
        &self,
        agent: &AgentCandidate,
        input: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallError> {
        if agent.endpoint.is_empty() {
            return Err(CallError::Declined(format!(
                "agent {} has no endpoint",
                agent.agent_id
            )));
        }

        let response = self
            .client
            .post(&agent.endpoint)
            .timeout(timeout)
            .json(&serde_json::json!({
                "agent_id": agent.agent_id,
                "input": input,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout(timeout.as_millis() as u64)
                } else {
                    CallError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::Connection(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(CallError::RateLimited(truncate(&body, 200).to_string()));
        }
        if !status.is_success() {
            return Err(CallError::Http {
                status: status.as_u16(),
                body: truncate(&body, 200).to_string(),
            });
        }
        interpret_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_body_variants() {
        assert_eq!(
            interpret_body(r#"{"output": {"summary": "done"}}"#).unwrap(),
            serde_json::json!({"summary": "done"})
        );
        assert_eq!(
            interpret_body(r#"{"summary": "done"}"#).unwrap(),
            serde_json::json!({"summary": "done"})
        );
        assert_eq!(
            interpret_body(r#"{"declined": "out of scope"}"#).unwrap_err(),
            CallError::Declined("out of scope".to_string())
        );
        assert!(matches!(
            interpret_body("<html>").unwrap_err(),
            CallError::Malformed(_)
        ));
        assert!(interpret_body(r#"{"error": null, "output": 1}"#).is_ok());
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_declined() {
        let agent = AgentCandidate {
            agent_id: "a".to_string(),
            capability_set: vec![],
            reputation_score: 1.0,
            price: 1,
            status: shared_types::AgentStatus::Active,
            endpoint: String::new(),
            protocol: "http".to_string(),
        };
        let err = HttpCapabilityAdapter::new()
            .call(&agent, &serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Declined(_)));
    }
}
