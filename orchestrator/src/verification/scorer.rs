use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// What the scorer is asked to judge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringRequest {
    pub task_id: String,
    pub subtask_id: String,
    pub description: String,
    pub capability_requirement: String,
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ScorerError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),
    #[error("scorer timed out after {0}ms")]
    Timeout(u64),
    #[error("invalid scores: {0}")]
    Invalid(String),
}

impl ScorerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScorerError::Unavailable(_) | ScorerError::Timeout(_))
    }
}

/// Produces per-dimension scores in `[0, 100]`.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(&self, request: &ScoringRequest) -> Result<BTreeMap<String, f64>, ScorerError>;
}

pub type SharedQualityScorer = Arc<dyn QualityScorer>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScoreResponse {
    Wrapped { dimension_scores: BTreeMap<String, f64> },
    Bare(BTreeMap<String, f64>),
}

/// Scorer reached over HTTP: POSTs the [`ScoringRequest`] as JSON.
#[derive(Debug, Clone)]
pub struct HttpQualityScorer {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpQualityScorer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl QualityScorer for HttpQualityScorer {
    async fn score(&self, request: &ScoringRequest) -> Result<BTreeMap<String, f64>, ScorerError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScorerError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    ScorerError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ScorerError::Unavailable(format!("scorer returned {status}")));
        }
        if !status.is_success() {
            return Err(ScorerError::Invalid(format!("scorer returned {status}")));
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| ScorerError::Invalid(e.to_string()))?;
        Ok(match parsed {
            ScoreResponse::Wrapped { dimension_scores } => dimension_scores,
            ScoreResponse::Bare(scores) => scores,
        })
    }
}
