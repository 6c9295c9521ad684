use ractor::ActorRef;
use shared_types::{SubtaskStatus, VerificationDecision, STEP_VERIFYING};

use crate::actors::task::actor::{TaskActor, TaskState};
use crate::actors::task::{
    events::{self, subtask_step},
    protocol::{Phase, TaskMsg},
};
use crate::error::OrchestratorError;
use crate::verification::VerificationContext;

impl TaskActor {
    pub(crate) async fn verify(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
    ) -> Result<(), OrchestratorError> {
        let index = state.record.current;
        let task_id = state.record.task_id.clone();
        let mode = state.record.verification_mode;
        let step = subtask_step(STEP_VERIFYING, index);

        let (ctx, output) = {
            let subtask = state
                .record
                .current_subtask_mut()
                .ok_or_else(|| OrchestratorError::Internal("no current subtask".to_string()))?;
            let output = subtask.output.clone().ok_or_else(|| {
                OrchestratorError::Internal("verification without output".to_string())
            })?;
            subtask.status = SubtaskStatus::Verifying;
            let ctx = VerificationContext {
                task_id: task_id.clone(),
                subtask_id: subtask.subtask_id.clone(),
                description: subtask.description.clone(),
                capability_requirement: subtask.capability_requirement.clone(),
                agent_id: subtask.agent_id().unwrap_or_default().to_string(),
                attempt: subtask.attempt_count,
                mode,
            };
            (ctx, output)
        };
        state.record.current_step = Some(step.clone());

        let verifier = state.services.verifier.clone();
        let result = match verifier.verify(&ctx, &output).await {
            Ok(result) => result,
            Err(e) => {
                // Scorer trouble is not the agent's fault, so no fallback.
                let err = OrchestratorError::from(e);
                events::emit_step_failed(state.log(), &task_id, &step, &err);
                return self.fail_subtask(myself, state, err).await;
            }
        };

        events::emit_verification(state.log(), &task_id, index, &result);
        if let Some(subtask) = state.record.current_subtask_mut() {
            subtask.verifications.push(result.clone());
        }

        match result.decision {
            VerificationDecision::AutoApprove => {
                self.advance(myself, Phase::Settle);
                Ok(())
            }
            VerificationDecision::PendingHuman => self.open_review(myself, state),
            VerificationDecision::Reject => {
                let reason = result
                    .rejection_reason
                    .unwrap_or_else(|| "rejected by verification".to_string());
                self.reject_output(myself, state, reason).await
            }
        }
    }
}
