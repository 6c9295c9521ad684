use ractor::ActorRef;
use shared_types::{SubtaskStatus, TaskStatus, STEP_NEGOTIATING};

use crate::actors::task::actor::{TaskActor, TaskState};
use crate::actors::task::{
    events::{self, subtask_step},
    protocol::{Phase, TaskMsg},
    state::SubtaskRecord,
};
use crate::error::OrchestratorError;
use crate::ranking::{NegotiationError, RankingRequest};

impl TaskActor {
    /// Rank candidates for the current subtask and select the best one not
    /// yet tried. With no subtask left, the task finishes.
    pub(crate) async fn negotiate(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
    ) -> Result<(), OrchestratorError> {
        let index = state.record.current;
        let max_attempts = state.services.settings.max_subtask_attempts;
        let task_id = state.record.task_id.clone();
        let budget_remaining = state.services.payments.budget_remaining(&task_id);
        let min_reputation = state.record.min_reputation_score;
        let step = subtask_step(STEP_NEGOTIATING, index);

        if state.record.current_subtask().is_none() {
            return self.finish(myself, state).await;
        }
        let request = {
            let subtask = state
                .record
                .current_subtask_mut()
                .ok_or_else(|| OrchestratorError::Internal("no current subtask".to_string()))?;
            if subtask.attempt_count >= max_attempts {
                let err = exhausted(subtask, &format!("attempt limit of {max_attempts} reached"));
                events::emit_step_failed(&state.services.progress_log, &task_id, &step, &err);
                return self.fail_subtask(myself, state, err).await;
            }
            subtask.status = SubtaskStatus::Negotiating;
            RankingRequest {
                capability_requirement: subtask.capability_requirement.clone(),
                budget_remaining,
                min_reputation_score: min_reputation,
                excluded_agents: subtask.failed_agents.clone(),
            }
        };
        state.record.current_step = Some(step.clone());
        events::emit_negotiation_started(
            state.log(),
            &task_id,
            index,
            &request.capability_requirement,
            budget_remaining,
            &request.excluded_agents,
        );

        let ranking = state.services.ranking.clone();
        let ranked = match ranking.rank(&request).await {
            Ok(ranked) => ranked,
            Err(e) => {
                let err = match (&e, state.record.current_subtask()) {
                    (NegotiationError::NoEligibleAgent { .. }, Some(subtask))
                        if !subtask.failed_agents.is_empty() =>
                    {
                        exhausted(subtask, "no eligible fallback agent")
                    }
                    _ => OrchestratorError::from(e),
                };
                events::emit_step_failed(state.log(), &task_id, &step, &err);
                return self.fail_subtask(myself, state, err).await;
            }
        };

        let ranked_ids: Vec<String> = ranked.iter().map(|a| a.agent_id.clone()).collect();
        let Some(agent) = ranked.into_iter().next() else {
            return Err(OrchestratorError::Internal(
                "ranking returned an empty candidate list".to_string(),
            ));
        };

        let attempt = match state.record.current_subtask_mut() {
            Some(subtask) => {
                subtask.attempt_count += 1;
                subtask.assigned_agent = Some(agent.clone());
                subtask.attempt_count
            }
            None => return Err(OrchestratorError::Internal("subtask vanished".to_string())),
        };

        tracing::info!(
            task_id = %task_id,
            subtask = index + 1,
            agent_id = %agent.agent_id,
            price = agent.price,
            attempt,
            "Agent selected"
        );
        events::emit_agent_selected(
            state.log(),
            &task_id,
            index,
            &ranked_ids,
            &agent.agent_id,
            agent.price,
            attempt,
        );

        state.record.transition(TaskStatus::Paying)?;
        self.advance(myself, Phase::Pay);
        Ok(())
    }
}

/// Error for a subtask whose candidates or attempts ran out. Budget failures
/// keep their kind; everything else reports as a permanent execution failure
/// naming the last cause.
fn exhausted(subtask: &SubtaskRecord, why: &str) -> OrchestratorError {
    match &subtask.last_failure {
        Some(OrchestratorError::BudgetExceeded(message)) => {
            OrchestratorError::BudgetExceeded(message.clone())
        }
        Some(last) => OrchestratorError::ExecutionPermanent(format!(
            "subtask {} failed after {} attempt(s), {why}; last failure: {}",
            subtask.subtask_id,
            subtask.attempt_count,
            last.detail()
        )),
        None => OrchestratorError::ExecutionPermanent(format!(
            "subtask {} failed after {} attempt(s), {why}",
            subtask.subtask_id, subtask.attempt_count
        )),
    }
}
