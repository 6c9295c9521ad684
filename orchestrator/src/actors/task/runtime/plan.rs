use ractor::ActorRef;
use shared_types::{TaskStatus, STEP_PLANNING};

use crate::actors::task::actor::{TaskActor, TaskState};
use crate::actors::task::{
    events,
    protocol::{Phase, TaskMsg},
    state::SubtaskRecord,
};
use crate::error::OrchestratorError;

impl TaskActor {
    pub(crate) async fn plan(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
    ) -> Result<(), OrchestratorError> {
        state.record.current_step = Some(STEP_PLANNING.to_string());
        events::emit_planning_started(state.log(), state.task_id());

        let planner = state.services.planner.clone();
        let timeout = state.services.settings.planning_timeout;
        let planned = tokio::time::timeout(
            timeout,
            planner.plan(
                &state.record.description,
                state.record.capability_hint.as_deref(),
            ),
        )
        .await;

        let specs = match planned {
            Ok(Ok(specs)) if !specs.is_empty() => specs,
            Ok(Ok(_)) => {
                return Err(self.planning_failed(state, OrchestratorError::from(
                    crate::planning::PlanningError::Empty,
                )))
            }
            Ok(Err(e)) => return Err(self.planning_failed(state, e.into())),
            Err(_) => {
                return Err(self.planning_failed(
                    state,
                    OrchestratorError::Timeout(format!(
                        "planning exceeded {}ms",
                        timeout.as_millis()
                    )),
                ))
            }
        };

        state.record.subtasks = specs.into_iter().map(SubtaskRecord::from_spec).collect();
        state.record.current = 0;

        let listed: Vec<(String, String)> = state
            .record
            .subtasks
            .iter()
            .map(|s| (s.subtask_id.clone(), s.capability_requirement.clone()))
            .collect();
        events::emit_planning_completed(state.log(), state.task_id(), &listed);
        tracing::info!(
            task_id = %state.task_id(),
            subtasks = listed.len(),
            "Task planned"
        );

        state.record.transition(TaskStatus::Negotiating)?;
        self.advance(myself, Phase::Negotiate);
        Ok(())
    }

    fn planning_failed(&self, state: &TaskState, err: OrchestratorError) -> OrchestratorError {
        events::emit_step_failed(state.log(), state.task_id(), STEP_PLANNING, &err);
        err
    }
}
