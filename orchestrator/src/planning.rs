//! Task decomposition seam
//!
//! Turning a description into subtasks is an external concern; the
//! orchestrator consumes the ordered list once, while PLANNING.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ranking::split_capabilities;

/// One unit of work as produced by a planner, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtaskSpec {
    pub description: String,
    /// Comma-separated capability tags.
    pub capability_requirement: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("planner produced no subtasks")]
    Empty,
    #[error("planner failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait TaskPlanner: Send + Sync {
    async fn plan(
        &self,
        description: &str,
        capability_hint: Option<&str>,
    ) -> Result<Vec<SubtaskSpec>, PlanningError>;
}

pub type SharedTaskPlanner = Arc<dyn TaskPlanner>;

/// Maps the whole task onto one subtask. Capability tags come from the
/// request hint, else from `default_capability`.
#[derive(Debug, Clone)]
pub struct SingleStepPlanner {
    default_capability: String,
}

impl SingleStepPlanner {
    pub fn new(default_capability: impl Into<String>) -> Self {
        Self {
            default_capability: default_capability.into(),
        }
    }
}

impl Default for SingleStepPlanner {
    fn default() -> Self {
        Self::new("research")
    }
}

#[async_trait]
impl TaskPlanner for SingleStepPlanner {
    async fn plan(
        &self,
        description: &str,
        capability_hint: Option<&str>,
    ) -> Result<Vec<SubtaskSpec>, PlanningError> {
        let capability = capability_hint
            .filter(|hint| !split_capabilities(hint).is_empty())
            .unwrap_or(self.default_capability.as_str());

        Ok(vec![SubtaskSpec {
            description: description.to_string(),
            capability_requirement: split_capabilities(capability).join(","),
            input: serde_json::json!({ "description": description }),
        }])
    }
}

/// Planner that replays a fixed plan; handy for scripted runs and tests.
#[derive(Debug, Clone)]
pub struct StaticPlanner {
    subtasks: Vec<SubtaskSpec>,
}

impl StaticPlanner {
    pub fn new(subtasks: Vec<SubtaskSpec>) -> Self {
        Self { subtasks }
    }
}

#[async_trait]
impl TaskPlanner for StaticPlanner {
    async fn plan(
        &self,
        _description: &str,
        _capability_hint: Option<&str>,
    ) -> Result<Vec<SubtaskSpec>, PlanningError> {
        if self.subtasks.is_empty() {
            return Err(PlanningError::Empty);
        }
        Ok(self.subtasks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_step_uses_hint_or_default() {
        let planner = SingleStepPlanner::default();
        let plan = planner
            .plan("Review the literature", Some("Research, Summarization"))
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].capability_requirement, "research,summarization");
        assert_eq!(plan[0].input["description"], "Review the literature");

        let plan = planner.plan("Review", Some("  ")).await.unwrap();
        assert_eq!(plan[0].capability_requirement, "research");
    }

    #[tokio::test]
    async fn test_static_planner_rejects_empty_plan() {
        assert_eq!(
            StaticPlanner::new(Vec::new()).plan("x", None).await,
            Err(PlanningError::Empty)
        );
    }
}
