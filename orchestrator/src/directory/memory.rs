use async_trait::async_trait;
use shared_types::AgentCandidate;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::{normalize_capability, AgentDirectory, DirectoryError};

/// Directory backed by a fixed list of agents, typically seeded from a JSON file.
#[derive(Debug, Default)]
pub struct InMemoryAgentDirectory {
    agents: RwLock<Vec<AgentCandidate>>,
    lookups: AtomicUsize,
}

impl InMemoryAgentDirectory {
    pub fn new(agents: Vec<AgentCandidate>) -> Self {
        Self {
            agents: RwLock::new(agents),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, DirectoryError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DirectoryError::Unavailable(format!("failed to read {}: {e}", path.display()))
        })?;
        let agents: Vec<AgentCandidate> = serde_json::from_str(&content)
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;
        Ok(Self::new(agents))
    }

    pub fn upsert(&self, agent: AgentCandidate) {
        if let Ok(mut agents) = self.agents.write() {
            agents.retain(|existing| existing.agent_id != agent.agent_id);
            agents.push(agent);
        }
    }

    /// Number of lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn find_by_capability(
        &self,
        capability: &str,
    ) -> Result<Vec<AgentCandidate>, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let wanted = normalize_capability(capability);
        let agents = self
            .agents
            .read()
            .map_err(|_| DirectoryError::Unavailable("directory lock poisoned".to_string()))?;
        Ok(agents
            .iter()
            .filter(|agent| {
                agent
                    .capability_set
                    .iter()
                    .any(|tag| normalize_capability(tag) == wanted)
            })
            .cloned()
            .collect())
    }
}
