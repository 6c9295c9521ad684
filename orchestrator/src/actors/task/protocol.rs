//! TaskActor message protocol

use ractor::RpcReplyPort;
use shared_types::{ReviewerDecision, TaskSnapshot};

use crate::error::OrchestratorError;

/// Phases of one subtask pass. Each is handled as its own message so that
/// cancellation and reviewer decisions land between phases, never inside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Plan,
    Negotiate,
    Pay,
    Execute,
    Verify,
    Settle,
}

#[derive(Debug)]
pub enum TaskMsg {
    /// Run the next phase (self-sent)
    Run(Phase),
    /// Current snapshot of the task
    GetSnapshot { reply: RpcReplyPort<TaskSnapshot> },
    /// Request cancellation; applied at the next phase boundary
    Cancel { reason: Option<String> },
    /// Reviewer verdict for a result awaiting human review
    SubmitDecision {
        decision: ReviewerDecision,
        reason: Option<String>,
        /// When set, must name the open review
        review_id: Option<String>,
        reply: RpcReplyPort<Result<(), OrchestratorError>>,
    },
    /// Review window elapsed (sent by the review timer)
    ReviewTimeout { review_id: String },
}
