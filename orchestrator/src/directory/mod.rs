//! Agent directory client
//!
//! The directory is an external registry of capability providers. The
//! orchestrator only reads from it: lookups by capability tag return
//! read-only [`AgentCandidate`] snapshots.

use async_trait::async_trait;
use shared_types::AgentCandidate;
use std::sync::Arc;

mod cache;
mod http;
mod memory;

pub use cache::CachedAgentDirectory;
pub use http::HttpAgentDirectory;
pub use memory::InMemoryAgentDirectory;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("directory lookup timed out after {0}ms")]
    Timeout(u64),
    #[error("invalid directory response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Return every known agent advertising `capability`, active or not.
    async fn find_by_capability(
        &self,
        capability: &str,
    ) -> Result<Vec<AgentCandidate>, DirectoryError>;
}

pub type SharedAgentDirectory = Arc<dyn AgentDirectory>;

/// Normalized form used when comparing capability tags.
pub fn normalize_capability(tag: &str) -> String {
    tag.trim().to_ascii_lowercase()
}
