use ractor::{ActorRef, RpcReplyPort};
use shared_types::{ReviewerDecision, SubtaskStatus, TaskStatus, STEP_HUMAN_REVIEW};

use crate::actors::task::actor::{TaskActor, TaskState};
use crate::actors::task::{
    events::{self, subtask_step},
    protocol::{Phase, TaskMsg},
};
use crate::error::OrchestratorError;
use crate::verification::{PendingReview, ReviewResolution, StaleDecision};

impl TaskActor {
    /// Park the current result for a reviewer and arm the review timer.
    pub(crate) fn open_review(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
    ) -> Result<(), OrchestratorError> {
        let index = state.record.current;
        let timeout = state.services.verifier.policy().review_timeout;
        let subtask = state
            .record
            .current_subtask_mut()
            .ok_or_else(|| OrchestratorError::Internal("no current subtask".to_string()))?;
        subtask.status = SubtaskStatus::PendingHuman;
        let review = PendingReview::open(&subtask.subtask_id, timeout);

        state.record.transition(TaskStatus::PendingHuman)?;
        state.record.current_step = Some(subtask_step(STEP_HUMAN_REVIEW, index));

        let timer_ref = myself.clone();
        let review_id = review.review_id.clone();
        state.cancel_review_timer();
        state.review_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timer_ref.cast(TaskMsg::ReviewTimeout { review_id });
        }));

        tracing::info!(
            task_id = %state.task_id(),
            review_id = %review.review_id,
            deadline = %review.deadline,
            "Awaiting human review"
        );
        events::emit_review_opened(state.log(), state.task_id(), index, &review);
        state.record.pending_review = Some(review);
        Ok(())
    }

    pub(crate) async fn handle_decision(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        decision: ReviewerDecision,
        reason: Option<String>,
        review_id: Option<String>,
        reply: RpcReplyPort<Result<(), OrchestratorError>>,
    ) -> Result<(), OrchestratorError> {
        let answers_open_review = state.record.status == TaskStatus::PendingHuman
            && state.record.pending_review.as_ref().is_some_and(|open| {
                review_id
                    .as_deref()
                    .map_or(true, |wanted| wanted == open.review_id)
            });
        let review = if answers_open_review {
            state.record.pending_review.take()
        } else {
            None
        };
        let Some(review) = review else {
            tracing::info!(
                task_id = %state.task_id(),
                decision = ?decision,
                review_id = ?review_id,
                "Stale review decision"
            );
            let _ = reply.send(Err(StaleDecision {
                task_id: state.record.task_id.clone(),
            }
            .into()));
            return Ok(());
        };

        let _ = reply.send(Ok(()));
        self.resolve_review(myself, state, review, ReviewResolution::Reviewer { decision, reason })
            .await
    }

    pub(crate) async fn handle_review_timeout(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        review_id: String,
    ) -> Result<(), OrchestratorError> {
        let matches = state
            .record
            .pending_review
            .as_ref()
            .is_some_and(|review| review.review_id == review_id);
        if !matches || state.record.status != TaskStatus::PendingHuman {
            tracing::debug!(task_id = %state.task_id(), review_id = %review_id, "Ignoring expired review timer");
            return Ok(());
        }
        let Some(review) = state.record.pending_review.take() else {
            return Ok(());
        };
        tracing::warn!(task_id = %state.task_id(), review_id = %review_id, "Review timed out");
        self.resolve_review(myself, state, review, ReviewResolution::TimedOut)
            .await
    }

    async fn resolve_review(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        review: PendingReview,
        resolution: ReviewResolution,
    ) -> Result<(), OrchestratorError> {
        state.cancel_review_timer();
        let index = state.record.current;

        let resolved = {
            let subtask = state
                .record
                .current_subtask_mut()
                .ok_or_else(|| OrchestratorError::Internal("no current subtask".to_string()))?;
            let result = subtask.verifications.last_mut().ok_or_else(|| {
                OrchestratorError::Internal("review without a verification result".to_string())
            })?;
            review.resolve(result, resolution);
            subtask.status = SubtaskStatus::Verifying;
            result.clone()
        };
        state.record.transition(TaskStatus::Verifying)?;
        events::emit_review_resolved(state.log(), state.task_id(), index, &resolved);

        if resolved.approved() {
            self.advance(myself, Phase::Settle);
            Ok(())
        } else {
            let reason = resolved
                .rejection_reason
                .unwrap_or_else(|| "rejected by reviewer".to_string());
            self.reject_output(myself, state, reason).await
        }
    }

    pub(crate) async fn reject_output(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        reason: String,
    ) -> Result<(), OrchestratorError> {
        let err = OrchestratorError::ExecutionPermanent(format!("output rejected: {reason}"));
        self.fallback(myself, state, err).await
    }
}
