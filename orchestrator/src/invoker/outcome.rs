use serde::{Deserialize, Serialize};

/// Raw failure reported by a capability backend.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CallError {
    #[error("call timed out after {0}ms")]
    Timeout(u64),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("agent returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limit exhausted: {0}")]
    RateLimited(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("agent declined: {0}")]
    Declined(String),
    #[error("no adapter for protocol '{0}'")]
    UnsupportedProtocol(String),
}

impl CallError {
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Timeout(_) | CallError::Connection(_) => true,
            CallError::Http { status, .. } => *status >= 500 || *status == 408,
            CallError::RateLimited(_)
            | CallError::Malformed(_)
            | CallError::Declined(_)
            | CallError::UnsupportedProtocol(_) => false,
        }
    }
}

/// Classified result of invoking a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Success(serde_json::Value),
    /// Worth retrying against the same agent.
    TransientFailure(String),
    /// Move on to the next candidate.
    PermanentFailure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

pub fn classify(result: Result<serde_json::Value, CallError>) -> Outcome {
    match result {
        Ok(data) => Outcome::Success(data),
        Err(err) if err.is_transient() => Outcome::TransientFailure(err.to_string()),
        Err(err) => Outcome::PermanentFailure(err.to_string()),
    }
}
