//! Orchestrator error taxonomy
//!
//! Component errors funnel into [`OrchestratorError`], which is what task
//! records and the HTTP API expose (as [`shared_types::TaskError`]).

use shared_types::{ErrorKind, TaskError};

use crate::payments::PaymentError;
use crate::planning::PlanningError;
use crate::ranking::NegotiationError;
use crate::verification::{StaleDecision, VerificationError};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("payment failed: {0}")]
    Payment(String),
    #[error("execution failed: {0}")]
    ExecutionPermanent(String),
    #[error("verification failed: {0}")]
    Verification(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("stale decision: {0}")]
    StaleDecision(String),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("task cancelled: {0}")]
    Cancelled(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Negotiation(_) => ErrorKind::Negotiation,
            Self::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            Self::Payment(_) => ErrorKind::Payment,
            Self::ExecutionPermanent(_) => ErrorKind::ExecutionPermanent,
            Self::Verification(_) => ErrorKind::Verification,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::StaleDecision(_) => ErrorKind::StaleDecision,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Negotiation(m)
            | Self::BudgetExceeded(m)
            | Self::Payment(m)
            | Self::ExecutionPermanent(m)
            | Self::Verification(m)
            | Self::Timeout(m)
            | Self::StaleDecision(m)
            | Self::NotFound(m)
            | Self::InvalidRequest(m)
            | Self::Cancelled(m)
            | Self::Internal(m) => m,
        }
    }

    /// Whether resubmitting the same task could plausibly succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Negotiation(_)
                | Self::Payment(_)
                | Self::ExecutionPermanent(_)
                | Self::Verification(_)
                | Self::Timeout(_)
                | Self::Internal(_)
        )
    }

    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Negotiation(_) => Some(
                "Lower min_reputation_score, raise budget_limit, or broaden capability_requirements",
            ),
            Self::BudgetExceeded(_) => Some("Raise budget_limit for this task"),
            Self::Payment(_) => Some("Check the settlement service and resubmit the task"),
            Self::ExecutionPermanent(_) => {
                Some("Resubmit later; all candidate agents failed for this subtask")
            }
            Self::Verification(_) => Some("Quality scorer was unavailable; resubmit the task"),
            Self::Timeout(_) => Some("Resubmit the task or increase the configured timeout"),
            Self::StaleDecision(_) => Some("Fetch the task status; the review is already resolved"),
            Self::NotFound(_) => Some("Check the task_id"),
            Self::InvalidRequest(_) | Self::Cancelled(_) | Self::Internal(_) => None,
        }
    }

    pub fn to_task_error(&self) -> TaskError {
        TaskError {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.retryable(),
            remediation: self.remediation().map(ToString::to_string),
        }
    }
}

impl From<OrchestratorError> for TaskError {
    fn from(err: OrchestratorError) -> Self {
        err.to_task_error()
    }
}

impl From<NegotiationError> for OrchestratorError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::Directory(crate::directory::DirectoryError::Timeout(ms)) => {
                Self::Timeout(format!("agent directory lookup exceeded {ms}ms"))
            }
            other => Self::Negotiation(other.to_string()),
        }
    }
}

impl From<PaymentError> for OrchestratorError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::BudgetExceeded { .. } => Self::BudgetExceeded(err.to_string()),
            PaymentError::UnknownTask(_) | PaymentError::Internal(_) => {
                Self::Internal(err.to_string())
            }
            other => Self::Payment(other.to_string()),
        }
    }
}

impl From<VerificationError> for OrchestratorError {
    fn from(err: VerificationError) -> Self {
        Self::Verification(err.to_string())
    }
}

impl From<PlanningError> for OrchestratorError {
    fn from(err: PlanningError) -> Self {
        Self::Internal(format!("planning: {err}"))
    }
}

impl From<StaleDecision> for OrchestratorError {
    fn from(err: StaleDecision) -> Self {
        Self::StaleDecision(err.to_string())
    }
}
