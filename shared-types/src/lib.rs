//! Shared types between the task orchestrator and its clients
//!
//! These types are used by both:
//! - The orchestrator actors and HTTP API (native Rust)
//! - Any client that submits tasks or follows their progress
//!
//! Serializable with serde for JSON over WebSocket/HTTP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Core Types
// ============================================================================

/// Monetary amount in integer minor units of the settlement currency.
pub type Amount = u64;

/// Free-form key/value data attached to progress events and outputs.
pub type DataMap = BTreeMap<String, serde_json::Value>;

/// Lifecycle of a task.
///
/// ```text
/// PLANNING → NEGOTIATING → PAYING → EXECUTING → VERIFYING → COMPLETE
///                ↑                       |           |  ↘
///                └───────────────────────┴───────────┘   PENDING_HUMAN
/// any non-terminal state → FAILED | CANCELLED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Planning,
    Negotiating,
    Paying,
    Executing,
    Verifying,
    /// Paused sub-state of `Verifying` awaiting a reviewer.
    PendingHuman,
    Complete,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Planning => "PLANNING",
            TaskStatus::Negotiating => "NEGOTIATING",
            TaskStatus::Paying => "PAYING",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Verifying => "VERIFYING",
            TaskStatus::PendingHuman => "PENDING_HUMAN",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single subtask within a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    Negotiating,
    Paying,
    Executing,
    Verifying,
    PendingHuman,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl SubtaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubtaskStatus::Completed
                | SubtaskStatus::Failed
                | SubtaskStatus::Skipped
                | SubtaskStatus::Cancelled
        )
    }
}

/// How strictly results are verified before payment is released.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    #[default]
    Standard,
    /// Raises the auto-approve bar so more results go to a reviewer.
    Enhanced,
}

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Active,
    Inactive,
}

/// Read-only snapshot of a capability provider as returned by the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCandidate {
    pub agent_id: String,
    pub capability_set: Vec<String>,
    /// Reputation in `[0, 1]`.
    pub reputation_score: f64,
    pub price: Amount,
    #[serde(default)]
    pub status: AgentStatus,
    /// Where the agent is reached; interpretation depends on `protocol`.
    #[serde(default)]
    pub endpoint: String,
    /// Adapter protocol used to invoke this agent (e.g. `http`, `mock`).
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "http".to_string()
}

// ============================================================================
// Escrow
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowState {
    Proposed,
    Authorized,
    Released,
    Refunded,
}

impl EscrowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EscrowState::Released | EscrowState::Refunded)
    }

    /// Whether the amount counts against the task budget.
    pub fn is_committed(self) -> bool {
        matches!(self, EscrowState::Authorized | EscrowState::Released)
    }
}

/// Payment record held between proposal and final settlement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Escrow {
    pub payment_id: String,
    pub task_id: String,
    pub subtask_id: String,
    pub payer: String,
    pub payee: String,
    pub amount: Amount,
    pub state: EscrowState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Ledger reference returned by the hold, once authorized.
    pub hold_ref: Option<String>,
    pub notes: Option<String>,
    pub refund_reason: Option<String>,
}

// ============================================================================
// Verification
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationDecision {
    AutoApprove,
    PendingHuman,
    Reject,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerDecision {
    Approve,
    Reject,
}

impl ReviewerDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewerDecision::Approve => "approve",
            ReviewerDecision::Reject => "reject",
        }
    }
}

/// Outcome of one verification attempt for one subtask.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub subtask_id: String,
    pub attempt: u32,
    pub agent_id: String,
    pub dimension_scores: BTreeMap<String, f64>,
    pub aggregate_score: f64,
    pub ethics_passed: bool,
    pub decision: VerificationDecision,
    pub reviewer_decision: Option<ReviewerDecision>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VerificationResult {
    /// Final accept/reject after any human review.
    pub fn approved(&self) -> bool {
        match self.decision {
            VerificationDecision::AutoApprove => true,
            VerificationDecision::Reject => false,
            VerificationDecision::PendingHuman => {
                self.reviewer_decision == Some(ReviewerDecision::Approve)
            }
        }
    }
}

// ============================================================================
// Progress Events
// ============================================================================

pub const STEP_PLANNING: &str = "planning";
pub const STEP_NEGOTIATING: &str = "negotiating";
pub const STEP_PAYING: &str = "paying";
pub const STEP_EXECUTING: &str = "executing";
pub const STEP_VERIFYING: &str = "verifying";
pub const STEP_HUMAN_REVIEW: &str = "human_review";
pub const STEP_SETTLEMENT: &str = "settlement";
pub const STEP_FALLBACK: &str = "fallback";
pub const STEP_ORCHESTRATOR: &str = "orchestrator";

pub const PROGRESS_STARTED: &str = "started";
pub const PROGRESS_RUNNING: &str = "running";
pub const PROGRESS_WAITING: &str = "waiting";
pub const PROGRESS_COMPLETED: &str = "completed";
pub const PROGRESS_FAILED: &str = "failed";
pub const PROGRESS_CANCELLED: &str = "cancelled";

/// Append-only progress log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub task_id: String,
    /// Step key; events sharing a key are merged on read.
    pub step: String,
    /// Per-task sequence number (strictly increasing from 1)
    pub seq: u64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: DataMap,
}

/// Latest known state of one step, folded from every event sharing its key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepProgress {
    pub step: String,
    pub status: String,
    pub first_seq: u64,
    pub last_seq: u64,
    pub updated_at: DateTime<Utc>,
    pub data: DataMap,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Negotiation,
    BudgetExceeded,
    Payment,
    ExecutionPermanent,
    Verification,
    Timeout,
    StaleDecision,
    NotFound,
    InvalidRequest,
    Cancelled,
    Internal,
}

/// User-visible failure description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtaskSnapshot {
    pub subtask_id: String,
    pub task_id: String,
    pub description: String,
    pub capability_requirement: String,
    pub status: SubtaskStatus,
    pub assigned_agent_id: Option<String>,
    pub attempt_count: u32,
    pub cost: Amount,
    pub output: Option<serde_json::Value>,
    pub failed_agents: Vec<String>,
    pub verifications: Vec<VerificationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub description: String,
    pub budget_limit: Amount,
    pub min_reputation_score: f64,
    pub verification_mode: VerificationMode,
    pub status: TaskStatus,
    pub current_step: Option<String>,
    /// Set while a result awaits a reviewer.
    #[serde(default)]
    pub pending_review_id: Option<String>,
    pub subtasks: Vec<SubtaskSnapshot>,
    pub spent_to_date: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
}

// ============================================================================
// API Requests / Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub description: String,
    pub budget_limit: Amount,
    #[serde(default = "default_min_reputation")]
    pub min_reputation_score: f64,
    #[serde(default)]
    pub verification_mode: VerificationMode,
    /// Comma-separated capability tags; defaults to planner inference.
    #[serde(default)]
    pub capability_requirements: Option<String>,
}

fn default_min_reputation() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub task: TaskSnapshot,
    pub progress: Vec<StepProgress>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanDecisionRequest {
    pub decision: ReviewerDecision,
    #[serde(default)]
    pub reason: Option<String>,
    /// Review the decision answers; a mismatch with the open review is stale.
    #[serde(default)]
    pub review_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub task_id: String,
    pub accepted: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: TaskError,
}

// ============================================================================
// Tests
// ============================================================================
