//! Task and subtask records owned by one TaskActor

use chrono::{DateTime, Utc};
use shared_types::{
    AgentCandidate, Amount, CreateTaskRequest, SubtaskSnapshot, SubtaskStatus, TaskError,
    TaskSnapshot, TaskStatus, VerificationMode, VerificationResult,
};

use crate::error::OrchestratorError;
use crate::planning::SubtaskSpec;
use crate::verification::PendingReview;

/// Whether the task state machine allows `from → to`.
///
/// Forward path: PLANNING → NEGOTIATING → PAYING → EXECUTING → VERIFYING →
/// COMPLETE, with PENDING_HUMAN as a paused sub-state of VERIFYING. Backward
/// edges to NEGOTIATING carry fallback to the next agent and the hand-off to
/// the next subtask. NEGOTIATING → COMPLETE only happens when the final
/// subtask was skipped.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (_, Failed)
            | (_, Cancelled)
            | (Planning, Negotiating)
            | (Negotiating, Paying)
            | (Negotiating, Negotiating)
            | (Negotiating, Complete)
            | (Paying, Executing)
            | (Paying, Negotiating)
            | (Executing, Verifying)
            | (Executing, Negotiating)
            | (Verifying, PendingHuman)
            | (Verifying, Negotiating)
            | (Verifying, Complete)
            | (PendingHuman, Verifying)
    )
}

#[derive(Debug, Clone)]
pub struct SubtaskRecord {
    pub subtask_id: String,
    pub description: String,
    pub capability_requirement: String,
    pub input: serde_json::Value,
    pub status: SubtaskStatus,
    pub assigned_agent: Option<AgentCandidate>,
    pub attempt_count: u32,
    pub cost: Amount,
    pub output: Option<serde_json::Value>,
    pub failed_agents: Vec<String>,
    pub verifications: Vec<VerificationResult>,
    /// Escrow of the current attempt.
    pub payment_id: Option<String>,
    pub last_failure: Option<OrchestratorError>,
}

impl SubtaskRecord {
    pub fn from_spec(spec: SubtaskSpec) -> Self {
        Self {
            subtask_id: format!("sub_{}", ulid::Ulid::new()),
            description: spec.description,
            capability_requirement: spec.capability_requirement,
            input: spec.input,
            status: SubtaskStatus::Pending,
            assigned_agent: None,
            attempt_count: 0,
            cost: 0,
            output: None,
            failed_agents: Vec::new(),
            verifications: Vec::new(),
            payment_id: None,
            last_failure: None,
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.assigned_agent.as_ref().map(|a| a.agent_id.as_str())
    }

    /// Forget the current agent after it failed, so it is not tried again.
    pub fn mark_agent_failed(&mut self, failure: OrchestratorError) {
        if let Some(agent) = self.assigned_agent.take() {
            if !self.failed_agents.contains(&agent.agent_id) {
                self.failed_agents.push(agent.agent_id);
            }
        }
        self.payment_id = None;
        self.output = None;
        self.cost = 0;
        self.last_failure = Some(failure);
    }

    pub fn snapshot(&self, task_id: &str) -> SubtaskSnapshot {
        SubtaskSnapshot {
            subtask_id: self.subtask_id.clone(),
            task_id: task_id.to_string(),
            description: self.description.clone(),
            capability_requirement: self.capability_requirement.clone(),
            status: self.status,
            assigned_agent_id: self.agent_id().map(ToString::to_string),
            attempt_count: self.attempt_count,
            cost: self.cost,
            output: self.output.clone(),
            failed_agents: self.failed_agents.clone(),
            verifications: self.verifications.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub description: String,
    pub budget_limit: Amount,
    pub min_reputation_score: f64,
    pub verification_mode: VerificationMode,
    pub capability_hint: Option<String>,
    pub status: TaskStatus,
    pub current_step: Option<String>,
    pub subtasks: Vec<SubtaskRecord>,
    /// Index of the subtask being worked on.
    pub current: usize,
    pub spent_to_date: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    pub pending_review: Option<PendingReview>,
}

impl TaskRecord {
    pub fn new(task_id: String, request: &CreateTaskRequest) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            description: request.description.clone(),
            budget_limit: request.budget_limit,
            min_reputation_score: request.min_reputation_score,
            verification_mode: request.verification_mode,
            capability_hint: request.capability_requirements.clone(),
            status: TaskStatus::Planning,
            current_step: None,
            subtasks: Vec::new(),
            current: 0,
            spent_to_date: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            error: None,
            pending_review: None,
        }
    }

    pub fn transition(&mut self, to: TaskStatus) -> Result<(), OrchestratorError> {
        if !can_transition(self.status, to) {
            return Err(OrchestratorError::Internal(format!(
                "illegal task transition {} -> {}",
                self.status, to
            )));
        }
        tracing::debug!(task_id = %self.task_id, from = %self.status, to = %to, "Task transition");
        self.status = to;
        self.updated_at = Utc::now();
        if to.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    pub fn current_subtask(&self) -> Option<&SubtaskRecord> {
        self.subtasks.get(self.current)
    }

    pub fn current_subtask_mut(&mut self) -> Option<&mut SubtaskRecord> {
        self.subtasks.get_mut(self.current)
    }

    /// Output of the most recent completed subtask before the current one.
    pub fn previous_output(&self) -> Option<&serde_json::Value> {
        self.subtasks[..self.current.min(self.subtasks.len())]
            .iter()
            .rev()
            .find(|s| s.status == SubtaskStatus::Completed)
            .and_then(|s| s.output.as_ref())
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            description: self.description.clone(),
            budget_limit: self.budget_limit,
            min_reputation_score: self.min_reputation_score,
            verification_mode: self.verification_mode,
            status: self.status,
            current_step: self.current_step.clone(),
            pending_review_id: self.pending_review.as_ref().map(|r| r.review_id.clone()),
            subtasks: self
                .subtasks
                .iter()
                .map(|s| s.snapshot(&self.task_id))
                .collect(),
            spent_to_date: self.spent_to_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}
