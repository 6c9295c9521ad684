use async_trait::async_trait;
use serde::Deserialize;
use shared_types::AgentCandidate;
use std::time::Duration;

use super::{AgentDirectory, DirectoryError};

/// Client for a registry exposing `GET {base}/agents?capability=<tag>`.
#[derive(Debug, Clone)]
pub struct HttpAgentDirectory {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgentListing {
    Wrapped { agents: Vec<AgentCandidate> },
    Bare(Vec<AgentCandidate>),
}

impl HttpAgentDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AgentDirectory for HttpAgentDirectory {
    async fn find_by_capability(
        &self,
        capability: &str,
    ) -> Result<Vec<AgentCandidate>, DirectoryError> {
        let url = format!("{}/agents", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("capability", capability)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DirectoryError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    DirectoryError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(DirectoryError::Unavailable(format!(
                "registry returned {}",
                response.status()
            )));
        }

        let listing: AgentListing = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;
        Ok(match listing {
            AgentListing::Wrapped { agents } => agents,
            AgentListing::Bare(agents) => agents,
        })
    }
}
