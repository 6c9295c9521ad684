use ractor::ActorRef;
use shared_types::{SubtaskStatus, TaskStatus, STEP_SETTLEMENT};

use crate::actors::task::actor::{TaskActor, TaskState};
use crate::actors::task::{
    events::{self, subtask_step},
    protocol::{Phase, TaskMsg},
};
use crate::error::OrchestratorError;

impl TaskActor {
    /// Release the approved subtask's escrow and move to the next subtask.
    pub(crate) async fn settle(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
    ) -> Result<(), OrchestratorError> {
        let index = state.record.current;
        let task_id = state.record.task_id.clone();
        let step = subtask_step(STEP_SETTLEMENT, index);
        state.record.current_step = Some(step.clone());

        let (payment_id, agent_id) = {
            let subtask = state
                .record
                .current_subtask()
                .ok_or_else(|| OrchestratorError::Internal("no current subtask".to_string()))?;
            let payment_id = subtask.payment_id.clone().ok_or_else(|| {
                OrchestratorError::Internal("settlement without an escrow".to_string())
            })?;
            (payment_id, subtask.agent_id().unwrap_or_default().to_string())
        };

        let payments = state.services.payments.clone();
        let notes = format!("approved output from {agent_id}");
        let escrow = match payments.release(&payment_id, Some(notes)).await {
            Ok(escrow) => escrow,
            Err(e) => {
                let err = OrchestratorError::from(e);
                events::emit_step_failed(state.log(), &task_id, &step, &err);
                return self.fail_subtask(myself, state, err).await;
            }
        };

        if let Some(subtask) = state.record.current_subtask_mut() {
            subtask.status = SubtaskStatus::Completed;
            subtask.cost = escrow.amount;
        }
        state.record.spent_to_date = payments.released_total(&task_id);
        events::emit_escrow_resolved(state.log(), &task_id, index, &escrow);
        tracing::info!(
            task_id = %task_id,
            subtask = index + 1,
            payment_id = %payment_id,
            agent_id = %agent_id,
            amount = escrow.amount,
            "Subtask completed"
        );

        if index + 1 < state.record.subtasks.len() {
            state.record.current += 1;
            state.record.transition(TaskStatus::Negotiating)?;
            self.advance(myself, Phase::Negotiate);
            Ok(())
        } else {
            self.finish(myself, state).await
        }
    }
}
