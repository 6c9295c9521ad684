use async_trait::async_trait;
use shared_types::AgentCandidate;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{normalize_capability, AgentDirectory, DirectoryError, SharedAgentDirectory};

/// TTL cache in front of another directory. Lookups that exceed the
/// timeout fail with [`DirectoryError::Timeout`] and are not cached.
pub struct CachedAgentDirectory {
    inner: SharedAgentDirectory,
    ttl: Duration,
    lookup_timeout: Duration,
    entries: RwLock<HashMap<String, (Instant, Vec<AgentCandidate>)>>,
}

impl CachedAgentDirectory {
    pub fn new(inner: SharedAgentDirectory, ttl: Duration, lookup_timeout: Duration) -> Self {
        Self {
            inner,
            ttl,
            lookup_timeout,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl AgentDirectory for CachedAgentDirectory {
    async fn find_by_capability(
        &self,
        capability: &str,
    ) -> Result<Vec<AgentCandidate>, DirectoryError> {
        let key = normalize_capability(capability);
        if let Some((fetched_at, agents)) = self.entries.read().await.get(&key) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(agents.clone());
            }
        }

        let agents = tokio::time::timeout(
            self.lookup_timeout,
            self.inner.find_by_capability(capability),
        )
        .await
        .map_err(|_| DirectoryError::Timeout(self.lookup_timeout.as_millis() as u64))??;

        tracing::debug!(capability = %key, count = agents.len(), "Directory cache refreshed");
        self.entries
            .write()
            .await
            .insert(key, (Instant::now(), agents.clone()));
        Ok(agents)
    }
}
