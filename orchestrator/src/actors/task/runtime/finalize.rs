use ractor::ActorRef;
use shared_types::{SubtaskStatus, TaskStatus, STEP_SETTLEMENT};

use crate::actors::task::actor::{TaskActor, TaskState};
use crate::actors::task::{
    events::{self, subtask_step},
    protocol::{Phase, TaskMsg},
};
use crate::config::SubtaskFailurePolicy;
use crate::error::OrchestratorError;

impl TaskActor {
    /// Refund the current subtask's open escrow, if it has one. A refund the
    /// ledger refuses stays queued with the coordinator for the sweeper.
    pub(crate) async fn refund_current(
        &self,
        state: &mut TaskState,
        reason: &str,
    ) -> Result<(), OrchestratorError> {
        let index = state.record.current;
        let payments = state.services.payments.clone();
        let Some(subtask) = state.record.current_subtask() else {
            return Ok(());
        };
        let payment_id = match subtask
            .payment_id
            .clone()
            .or_else(|| {
                payments
                    .open_escrow_for_subtask(&subtask.subtask_id)
                    .map(|escrow| escrow.payment_id)
            }) {
            Some(id) => id,
            None => return Ok(()),
        };
        if payments
            .get(&payment_id)
            .is_some_and(|escrow| escrow.state.is_terminal())
        {
            return Ok(());
        }

        match payments.refund(&payment_id, reason).await {
            Ok(escrow) => {
                events::emit_escrow_resolved(state.log(), state.task_id(), index, &escrow);
                if let Some(subtask) = state.record.current_subtask_mut() {
                    subtask.payment_id = None;
                }
                Ok(())
            }
            Err(e) => {
                let err = OrchestratorError::from(e);
                tracing::warn!(
                    task_id = %state.task_id(),
                    payment_id = %payment_id,
                    error = %err,
                    "Refund failed; queued for retry"
                );
                events::emit_step_failed(
                    state.log(),
                    state.task_id(),
                    &subtask_step(STEP_SETTLEMENT, index),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Give up on the current agent and negotiate with the next candidate.
    pub(crate) async fn fallback(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        failure: OrchestratorError,
    ) -> Result<(), OrchestratorError> {
        if let Err(refund_err) = self.refund_current(state, failure.detail()).await {
            return self.fail_subtask(myself, state, refund_err).await;
        }

        let index = state.record.current;
        let failed_agent = match state.record.current_subtask_mut() {
            Some(subtask) => {
                let agent = subtask.agent_id().map(ToString::to_string);
                subtask.mark_agent_failed(failure.clone());
                subtask.status = SubtaskStatus::Negotiating;
                agent
            }
            None => None,
        };

        tracing::warn!(
            task_id = %state.task_id(),
            subtask = index + 1,
            agent_id = ?failed_agent,
            reason = %failure,
            "Falling back to next candidate"
        );
        events::emit_fallback(
            state.log(),
            state.task_id(),
            index,
            failed_agent.as_deref(),
            failure.detail(),
        );

        if state.record.status != TaskStatus::Negotiating {
            state.record.transition(TaskStatus::Negotiating)?;
        }
        self.advance(myself, Phase::Negotiate);
        Ok(())
    }

    /// The current subtask cannot complete. Depending on policy the task
    /// fails or moves on to the next subtask.
    pub(crate) async fn fail_subtask(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        err: OrchestratorError,
    ) -> Result<(), OrchestratorError> {
        let _ = self.refund_current(state, err.detail()).await;
        let policy = state.services.settings.failure_policy;

        if let Some(subtask) = state.record.current_subtask_mut() {
            subtask.last_failure = Some(err.clone());
            subtask.status = match policy {
                SubtaskFailurePolicy::FailTask => SubtaskStatus::Failed,
                SubtaskFailurePolicy::Skip => SubtaskStatus::Skipped,
            };
        }

        match policy {
            SubtaskFailurePolicy::FailTask => {
                self.fail_task(myself, state, err).await;
                Ok(())
            }
            SubtaskFailurePolicy::Skip => {
                tracing::warn!(
                    task_id = %state.task_id(),
                    subtask = state.record.current + 1,
                    error = %err,
                    "Skipping failed subtask"
                );
                state.record.current += 1;
                if state.record.status != TaskStatus::Negotiating {
                    state.record.transition(TaskStatus::Negotiating)?;
                }
                self.advance(myself, Phase::Negotiate);
                Ok(())
            }
        }
    }

    /// All subtasks are done (completed or skipped).
    pub(crate) async fn finish(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
    ) -> Result<(), OrchestratorError> {
        let completed: Vec<serde_json::Value> = state
            .record
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .map(|s| {
                serde_json::json!({
                    "subtask_id": s.subtask_id,
                    "agent_id": s.agent_id(),
                    "cost": s.cost,
                    "output": s.output,
                })
            })
            .collect();

        if completed.is_empty() {
            let err = state
                .record
                .subtasks
                .iter()
                .rev()
                .find_map(|s| s.last_failure.clone())
                .unwrap_or_else(|| {
                    OrchestratorError::ExecutionPermanent("no subtask completed".to_string())
                });
            self.fail_task(myself, state, err).await;
            return Ok(());
        }

        let task_id = state.record.task_id.clone();
        let spent = state.services.payments.released_total(&task_id);
        let output = state
            .record
            .subtasks
            .iter()
            .rev()
            .find(|s| s.status == SubtaskStatus::Completed)
            .and_then(|s| s.output.clone());
        let result = serde_json::json!({
            "output": output,
            "subtasks": completed,
            "total_cost": spent,
        });

        state.record.spent_to_date = spent;
        state.record.result = Some(result.clone());
        state.record.transition(TaskStatus::Complete)?;
        state.record.current_step = None;

        tracing::info!(task_id = %task_id, spent, "Task complete");
        events::emit_task_completed(state.log(), &task_id, spent, &result);
        myself.stop(None);
        Ok(())
    }

    /// Terminal failure. Any escrow still open for the current subtask is
    /// refunded first.
    pub(crate) async fn fail_task(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        err: OrchestratorError,
    ) {
        if state.record.status.is_terminal() {
            return;
        }
        state.cancel_review_timer();
        let _ = self.refund_current(state, err.detail()).await;
        if let Some(subtask) = state.record.current_subtask_mut() {
            if !subtask.status.is_terminal() {
                subtask.status = SubtaskStatus::Failed;
                subtask.last_failure = Some(err.clone());
            }
        }

        state.record.pending_review = None;
        state.record.error = Some(err.to_task_error());
        state.record.spent_to_date = state.services.payments.released_total(state.task_id());
        if let Err(e) = state.record.transition(TaskStatus::Failed) {
            tracing::error!(task_id = %state.task_id(), error = %e, "Could not mark task failed");
        }

        tracing::error!(task_id = %state.task_id(), error = %err, "Task failed");
        events::emit_task_failed(state.log(), state.task_id(), &err);
        myself.stop(None);
    }

    pub(crate) async fn handle_cancel(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        reason: Option<String>,
    ) {
        if state.record.status.is_terminal() {
            tracing::debug!(task_id = %state.task_id(), "Cancel after terminal state ignored");
            return;
        }
        let reason = reason.unwrap_or_else(|| "cancelled by request".to_string());
        state.cancel_review_timer();
        state.record.pending_review = None;

        // A refund the ledger refuses is still retried by the sweeper.
        let _ = self
            .refund_current(state, &format!("task cancelled: {reason}"))
            .await;

        for subtask in state.record.subtasks.iter_mut().skip(state.record.current) {
            if !subtask.status.is_terminal() {
                subtask.status = SubtaskStatus::Cancelled;
                // Output of an interrupted attempt is discarded.
                subtask.output = None;
            }
        }

        state.record.error = Some(OrchestratorError::Cancelled(reason.clone()).to_task_error());
        state.record.spent_to_date = state.services.payments.released_total(state.task_id());
        if let Err(e) = state.record.transition(TaskStatus::Cancelled) {
            tracing::error!(task_id = %state.task_id(), error = %e, "Could not mark task cancelled");
        }

        tracing::info!(task_id = %state.task_id(), reason = %reason, "Task cancelled");
        events::emit_task_cancelled(state.log(), state.task_id(), &reason);
        myself.stop(None);
    }
}
