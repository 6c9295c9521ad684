use ractor::ActorRef;
use shared_types::{SubtaskStatus, TaskStatus, STEP_PAYING};

use crate::actors::task::actor::{TaskActor, TaskState};
use crate::actors::task::{
    events::{self, subtask_step},
    protocol::{Phase, TaskMsg},
};
use crate::error::OrchestratorError;
use crate::payments::PaymentError;

impl TaskActor {
    /// Propose and authorize an escrow for the selected agent's price.
    pub(crate) async fn pay(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
    ) -> Result<(), OrchestratorError> {
        let index = state.record.current;
        let task_id = state.record.task_id.clone();
        let payer = state.services.settings.payer_id.clone();
        let step = subtask_step(STEP_PAYING, index);

        let (subtask_id, payee, amount) = {
            let subtask = state
                .record
                .current_subtask_mut()
                .ok_or_else(|| OrchestratorError::Internal("no current subtask".to_string()))?;
            let agent = subtask.assigned_agent.as_ref().ok_or_else(|| {
                OrchestratorError::Internal("payment without a selected agent".to_string())
            })?;
            let selected = (subtask.subtask_id.clone(), agent.agent_id.clone(), agent.price);
            subtask.status = SubtaskStatus::Paying;
            selected
        };
        state.record.current_step = Some(step.clone());

        let payments = state.services.payments.clone();
        let escrow = match payments.propose(&task_id, &subtask_id, &payer, &payee, amount) {
            Ok(escrow) => escrow,
            Err(e) => return self.payment_failed(myself, state, &step, e).await,
        };
        if let Some(subtask) = state.record.current_subtask_mut() {
            subtask.payment_id = Some(escrow.payment_id.clone());
        }

        match payments.authorize(&escrow.payment_id).await {
            Ok(escrow) => {
                events::emit_escrow_authorized(state.log(), &task_id, index, &escrow);
                state.record.transition(TaskStatus::Executing)?;
                self.advance(myself, Phase::Execute);
                Ok(())
            }
            Err(e) => self.payment_failed(myself, state, &step, e).await,
        }
    }

    /// Over-budget candidates are skipped in favour of the next one; any
    /// other payment failure ends the subtask after refunding what was held.
    async fn payment_failed(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        step: &str,
        error: PaymentError,
    ) -> Result<(), OrchestratorError> {
        let err = OrchestratorError::from(error);
        tracing::warn!(task_id = %state.task_id(), error = %err, "Escrow setup failed");
        events::emit_step_failed(state.log(), state.task_id(), step, &err);

        match err {
            OrchestratorError::BudgetExceeded(_) => self.fallback(myself, state, err).await,
            _ => self.fail_subtask(myself, state, err).await,
        }
    }
}
