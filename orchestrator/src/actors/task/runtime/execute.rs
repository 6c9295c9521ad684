use ractor::ActorRef;
use shared_types::{SubtaskStatus, TaskStatus, STEP_EXECUTING};

use crate::actors::task::actor::{TaskActor, TaskState};
use crate::actors::task::{
    events::{self, subtask_step},
    protocol::{Phase, TaskMsg},
};
use crate::error::OrchestratorError;
use crate::invoker::Outcome;

impl TaskActor {
    pub(crate) async fn execute(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
    ) -> Result<(), OrchestratorError> {
        let index = state.record.current;
        let task_id = state.record.task_id.clone();
        let step = subtask_step(STEP_EXECUTING, index);
        let previous_output = state.record.previous_output().cloned();

        let (agent, input, attempt) = {
            let subtask = state
                .record
                .current_subtask_mut()
                .ok_or_else(|| OrchestratorError::Internal("no current subtask".to_string()))?;
            let agent = subtask.assigned_agent.clone().ok_or_else(|| {
                OrchestratorError::Internal("execution without a selected agent".to_string())
            })?;
            subtask.status = SubtaskStatus::Executing;
            let input = serde_json::json!({
                "task_id": task_id,
                "subtask_id": subtask.subtask_id,
                "description": subtask.description,
                "capability_requirement": subtask.capability_requirement,
                "input": subtask.input,
                "previous_output": previous_output,
            });
            (agent, input, subtask.attempt_count)
        };
        state.record.current_step = Some(step.clone());
        events::emit_execution_started(state.log(), &task_id, index, &agent.agent_id, attempt);

        let invoker = state.services.invoker.clone();
        let invocation = invoker
            .invoke(&agent, &input, state.services.settings.invoke_timeout)
            .await;

        match invocation.outcome {
            Outcome::Success(output) => {
                if let Some(subtask) = state.record.current_subtask_mut() {
                    subtask.output = Some(output);
                }
                events::emit_execution_completed(
                    state.log(),
                    &task_id,
                    index,
                    &agent.agent_id,
                    invocation.attempts,
                );
                state.record.transition(TaskStatus::Verifying)?;
                self.advance(myself, Phase::Verify);
                Ok(())
            }
            Outcome::TransientFailure(detail) | Outcome::PermanentFailure(detail) => {
                let err = OrchestratorError::ExecutionPermanent(format!(
                    "agent {} failed: {detail}",
                    agent.agent_id
                ));
                tracing::warn!(
                    task_id = %task_id,
                    agent_id = %agent.agent_id,
                    calls = invocation.attempts,
                    error = %err,
                    "Capability invocation failed"
                );
                events::emit_step_failed(state.log(), &task_id, &step, &err);
                self.fallback(myself, state, err).await
            }
        }
    }
}
