use chrono::{DateTime, Utc};
use shared_types::{ReviewerDecision, VerificationDecision, VerificationResult};
use std::time::Duration;

/// A verification result parked for a reviewer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReview {
    pub review_id: String,
    pub subtask_id: String,
    pub opened_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewResolution {
    Reviewer {
        decision: ReviewerDecision,
        reason: Option<String>,
    },
    TimedOut,
}

/// A decision arrived for a review that is no longer open.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("no pending review for task {task_id}")]
pub struct StaleDecision {
    pub task_id: String,
}

impl PendingReview {
    pub fn open(subtask_id: &str, timeout: Duration) -> Self {
        let opened_at = Utc::now();
        let deadline = opened_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            review_id: ulid::Ulid::new().to_string(),
            subtask_id: subtask_id.to_string(),
            opened_at,
            deadline,
        }
    }

    /// Record the resolution on the parked result. Timeouts count as rejection.
    pub fn resolve(&self, result: &mut VerificationResult, resolution: ReviewResolution) {
        debug_assert_eq!(result.decision, VerificationDecision::PendingHuman);
        match resolution {
            ReviewResolution::Reviewer { decision, reason } => {
                result.reviewer_decision = Some(decision);
                if decision == ReviewerDecision::Reject {
                    result.rejection_reason =
                        Some(reason.unwrap_or_else(|| "rejected by reviewer".to_string()));
                }
            }
            ReviewResolution::TimedOut => {
                result.reviewer_decision = Some(ReviewerDecision::Reject);
                result.rejection_reason = Some(format!(
                    "review timed out at {}",
                    self.deadline.to_rfc3339()
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn pending() -> VerificationResult {
        VerificationResult {
            subtask_id: "sub".to_string(),
            attempt: 1,
            agent_id: "a".to_string(),
            dimension_scores: BTreeMap::new(),
            aggregate_score: 60.0,
            ethics_passed: true,
            decision: VerificationDecision::PendingHuman,
            reviewer_decision: None,
            rejection_reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reviewer_approval() {
        let review = PendingReview::open("sub", Duration::from_secs(60));
        let mut result = pending();
        review.resolve(
            &mut result,
            ReviewResolution::Reviewer {
                decision: ReviewerDecision::Approve,
                reason: None,
            },
        );
        assert!(result.approved());
        assert!(result.rejection_reason.is_none());
        assert!(review.deadline > review.opened_at);
    }

    #[test]
    fn test_timeout_defaults_to_reject() {
        let review = PendingReview::open("sub", Duration::from_secs(60));
        let mut result = pending();
        review.resolve(&mut result, ReviewResolution::TimedOut);
        assert!(!result.approved());
        assert_eq!(result.reviewer_decision, Some(ReviewerDecision::Reject));
        assert!(result.rejection_reason.unwrap().contains("timed out"));
    }
}
