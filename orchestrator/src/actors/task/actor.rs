//! TaskActor - drives one task through its lifecycle
//!
//! One actor per task. The actor owns the task record exclusively and moves
//! it forward one phase per `Run` message, so cancellation and reviewer
//! decisions queued meanwhile are handled between phases.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use shared_types::{CreateTaskRequest, TaskSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::actors::progress_log::ProgressLogMsg;
use crate::actors::task::{
    events,
    protocol::{Phase, TaskMsg},
    state::TaskRecord,
};
use crate::config::{OrchestratorConfig, SubtaskFailurePolicy};
use crate::error::OrchestratorError;
use crate::invoker::CapabilityInvoker;
use crate::payments::PaymentCoordinator;
use crate::planning::SharedTaskPlanner;
use crate::ranking::RankingEngine;
use crate::verification::VerificationGate;

#[derive(Debug, Default)]
pub struct TaskActor;

/// Per-task knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub payer_id: String,
    pub max_subtask_attempts: u32,
    pub failure_policy: SubtaskFailurePolicy,
    pub invoke_timeout: Duration,
    pub planning_timeout: Duration,
}

impl TaskSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            payer_id: config.orchestrator.payer_id.clone(),
            max_subtask_attempts: config.orchestrator.max_subtask_attempts,
            failure_policy: config.orchestrator.subtask_failure_policy,
            invoke_timeout: config.invoker.call_timeout(),
            planning_timeout: config.orchestrator.planning_timeout(),
        }
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            payer_id: "orchestrator".to_string(),
            max_subtask_attempts: 3,
            failure_policy: SubtaskFailurePolicy::FailTask,
            invoke_timeout: Duration::from_secs(30),
            planning_timeout: Duration::from_secs(60),
        }
    }
}

/// Collaborators shared by every task actor.
#[derive(Clone)]
pub struct TaskServices {
    pub planner: SharedTaskPlanner,
    pub ranking: Arc<RankingEngine>,
    pub payments: Arc<PaymentCoordinator>,
    pub invoker: Arc<CapabilityInvoker>,
    pub verifier: Arc<VerificationGate>,
    pub progress_log: ActorRef<ProgressLogMsg>,
    pub settings: TaskSettings,
}

pub struct TaskArguments {
    pub task_id: String,
    pub request: CreateTaskRequest,
    pub services: TaskServices,
    pub snapshot_tx: watch::Sender<TaskSnapshot>,
}

pub struct TaskState {
    pub(crate) record: TaskRecord,
    pub(crate) services: TaskServices,
    snapshot_tx: watch::Sender<TaskSnapshot>,
    pub(crate) review_timer: Option<JoinHandle<()>>,
}

impl TaskState {
    pub(crate) fn task_id(&self) -> &str {
        &self.record.task_id
    }

    pub(crate) fn log(&self) -> &ActorRef<ProgressLogMsg> {
        &self.services.progress_log
    }

    pub(crate) fn publish(&self) {
        self.snapshot_tx.send_replace(self.record.snapshot());
    }

    pub(crate) fn cancel_review_timer(&mut self) {
        if let Some(timer) = self.review_timer.take() {
            timer.abort();
        }
    }
}

/// Handle to a spawned task: its id, mailbox, and a live snapshot.
#[derive(Clone)]
pub struct TaskHandle {
    pub task_id: String,
    pub actor: ActorRef<TaskMsg>,
    pub snapshot: watch::Receiver<TaskSnapshot>,
}

impl TaskHandle {
    pub fn current(&self) -> TaskSnapshot {
        self.snapshot.borrow().clone()
    }
}

/// Spawn a task actor; it starts planning immediately.
pub async fn spawn_task(
    task_id: String,
    request: CreateTaskRequest,
    services: TaskServices,
) -> Result<TaskHandle, OrchestratorError> {
    let initial = TaskRecord::new(task_id.clone(), &request).snapshot();
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);

    let args = TaskArguments {
        task_id: task_id.clone(),
        request,
        services,
        snapshot_tx,
    };
    let (actor, _handle) = Actor::spawn(None, TaskActor, args)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("failed to spawn task actor: {e}")))?;

    Ok(TaskHandle {
        task_id,
        actor,
        snapshot: snapshot_rx,
    })
}

#[async_trait]
impl Actor for TaskActor {
    type Msg = TaskMsg;
    type State = TaskState;
    type Arguments = TaskArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            task_id = %args.task_id,
            budget_limit = args.request.budget_limit,
            "TaskActor starting"
        );
        Ok(TaskState {
            record: TaskRecord::new(args.task_id, &args.request),
            services: args.services,
            snapshot_tx: args.snapshot_tx,
            review_timer: None,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        events::emit_task_started(state.log(), state.task_id(), &state.record.description);
        self.advance(&myself, Phase::Plan);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TaskMsg::Run(phase) => {
                if state.record.status.is_terminal() {
                    tracing::debug!(task_id = %state.task_id(), phase = %phase, "Ignoring phase after terminal state");
                } else if let Err(err) = self.run_phase(&myself, state, phase).await {
                    self.fail_task(&myself, state, err).await;
                }
            }
            TaskMsg::GetSnapshot { reply } => {
                let _ = reply.send(state.record.snapshot());
            }
            TaskMsg::Cancel { reason } => {
                self.handle_cancel(&myself, state, reason).await;
            }
            TaskMsg::SubmitDecision {
                decision,
                reason,
                review_id,
                reply,
            } => {
                if let Err(err) = self
                    .handle_decision(&myself, state, decision, reason, review_id, reply)
                    .await
                {
                    self.fail_task(&myself, state, err).await;
                }
            }
            TaskMsg::ReviewTimeout { review_id } => {
                if let Err(err) = self.handle_review_timeout(&myself, state, review_id).await {
                    self.fail_task(&myself, state, err).await;
                }
            }
        }
        state.publish();
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.cancel_review_timer();
        state.publish();
        tracing::info!(
            actor_id = %myself.get_id(),
            task_id = %state.task_id(),
            status = %state.record.status,
            "TaskActor stopped"
        );
        Ok(())
    }
}

impl TaskActor {
    async fn run_phase(
        &self,
        myself: &ActorRef<TaskMsg>,
        state: &mut TaskState,
        phase: Phase,
    ) -> Result<(), OrchestratorError> {
        match phase {
            Phase::Plan => self.plan(myself, state).await,
            Phase::Negotiate => self.negotiate(myself, state).await,
            Phase::Pay => self.pay(myself, state).await,
            Phase::Execute => self.execute(myself, state).await,
            Phase::Verify => self.verify(myself, state).await,
            Phase::Settle => self.settle(myself, state).await,
        }
    }

    /// Queue the next phase. A closed mailbox means the actor is stopping.
    pub(crate) fn advance(&self, myself: &ActorRef<TaskMsg>, phase: Phase) {
        if let Err(e) = myself.send_message(TaskMsg::Run(phase)) {
            tracing::debug!(phase = %phase, error = %e, "Task mailbox closed");
        }
    }
}
