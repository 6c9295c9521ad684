//! Ranking Engine
//!
//! Turns a capability requirement into a deterministic, ordered list of
//! eligible agents. Filtering and ordering live in the pure
//! [`rank_candidates`]; [`RankingEngine`] adds the directory lookups.

use shared_types::{AgentCandidate, AgentStatus, Amount};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::directory::{normalize_capability, DirectoryError, SharedAgentDirectory};

/// Inputs for one ranking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingRequest {
    /// Comma-separated capability tags; an agent needs at least one of them.
    pub capability_requirement: String,
    pub budget_remaining: Amount,
    pub min_reputation_score: f64,
    /// Agents already tried for this subtask.
    pub excluded_agents: Vec<String>,
}

impl RankingRequest {
    pub fn capability_tags(&self) -> Vec<String> {
        split_capabilities(&self.capability_requirement)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum NegotiationError {
    #[error("no eligible agent for '{capability}' (min reputation {min_reputation}, budget remaining {budget_remaining})")]
    NoEligibleAgent {
        capability: String,
        min_reputation: f64,
        budget_remaining: Amount,
    },
    #[error("empty capability requirement")]
    EmptyRequirement,
    #[error("agent directory error: {0}")]
    Directory(#[from] DirectoryError),
}

pub fn split_capabilities(requirement: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in requirement.split(',').map(normalize_capability) {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn is_eligible(agent: &AgentCandidate, request: &RankingRequest, tags: &[String]) -> bool {
    agent.status == AgentStatus::Active
        && agent.reputation_score >= request.min_reputation_score
        && agent.price <= request.budget_remaining
        && !request.excluded_agents.contains(&agent.agent_id)
        && agent
            .capability_set
            .iter()
            .any(|cap| tags.contains(&normalize_capability(cap)))
}

/// Reputation descending, then price ascending, then agent_id ascending.
pub fn compare_candidates(a: &AgentCandidate, b: &AgentCandidate) -> Ordering {
    b.reputation_score
        .total_cmp(&a.reputation_score)
        .then_with(|| a.price.cmp(&b.price))
        .then_with(|| a.agent_id.cmp(&b.agent_id))
}

/// Filter and order candidates. Duplicate agent ids keep their first snapshot.
pub fn rank_candidates(
    candidates: impl IntoIterator<Item = AgentCandidate>,
    request: &RankingRequest,
) -> Vec<AgentCandidate> {
    let tags = request.capability_tags();
    let mut unique: BTreeMap<String, AgentCandidate> = BTreeMap::new();
    for agent in candidates {
        if is_eligible(&agent, request, &tags) {
            unique.entry(agent.agent_id.clone()).or_insert(agent);
        }
    }
    let mut ranked: Vec<AgentCandidate> = unique.into_values().collect();
    ranked.sort_by(compare_candidates);
    ranked
}

/// Ranks agents fetched from the directory.
#[derive(Clone)]
pub struct RankingEngine {
    directory: SharedAgentDirectory,
    lookup_timeout: Duration,
}

impl RankingEngine {
    pub fn new(directory: SharedAgentDirectory, lookup_timeout: Duration) -> Self {
        Self {
            directory,
            lookup_timeout,
        }
    }

    /// Look up every requested tag and return the ranked, non-empty list.
    pub async fn rank(
        &self,
        request: &RankingRequest,
    ) -> Result<Vec<AgentCandidate>, NegotiationError> {
        let tags = request.capability_tags();
        if tags.is_empty() {
            return Err(NegotiationError::EmptyRequirement);
        }

        let mut pool = Vec::new();
        for tag in &tags {
            let found = tokio::time::timeout(
                self.lookup_timeout,
                self.directory.find_by_capability(tag),
            )
            .await
            .map_err(|_| DirectoryError::Timeout(self.lookup_timeout.as_millis() as u64))??;
            pool.extend(found);
        }

        let ranked = rank_candidates(pool, request);
        tracing::debug!(
            capability = %request.capability_requirement,
            budget_remaining = request.budget_remaining,
            eligible = ranked.len(),
            "Ranked candidates"
        );

        if ranked.is_empty() {
            return Err(NegotiationError::NoEligibleAgent {
                capability: request.capability_requirement.clone(),
                min_reputation: request.min_reputation_score,
                budget_remaining: request.budget_remaining,
            });
        }
        Ok(ranked)
    }
}
