//! ProgressLogActor - append-only per-task progress log
//!
//! Each task's events are numbered from 1 in emission order. Nothing is ever
//! overwritten: readers fold the events that share a step key into a
//! [`StepProgress`] where the newest status wins and data fields merge.
//!
//! Because every append and read goes through the actor mailbox, a reader
//! always sees a prefix of the log with no half-applied event.
//!
//! A task's events are dropped as a whole with [`ProgressLogMsg::Forget`]
//! once the task itself has been evicted.
//!
//! # Example
//!
//! ```rust,ignore
//! use ractor::Actor;
//!
//! let (log_ref, _handle) =
//!     Actor::spawn(None, ProgressLogActor, ProgressLogArguments::default()).await?;
//!
//! append_progress(&log_ref, AppendProgress::new(task_id, "negotiating", "started")).await??;
//! let steps = get_step_progress(&log_ref, task_id).await?;
//! ```

use async_trait::async_trait;
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{DataMap, ProgressEvent, StepProgress};
use std::collections::HashMap;
use tokio::sync::broadcast;

#[derive(Debug, Default)]
pub struct ProgressLogActor;

#[derive(Debug, Clone)]
pub struct ProgressLogArguments {
    /// Buffered events per push subscriber before it starts lagging.
    pub subscriber_capacity: usize,
}

impl Default for ProgressLogArguments {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1024,
        }
    }
}

pub struct ProgressLogState {
    events: HashMap<String, Vec<ProgressEvent>>,
    live: broadcast::Sender<ProgressEvent>,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub enum ProgressLogMsg {
    /// Append and return the stored event
    Append {
        event: AppendProgress,
        reply: RpcReplyPort<Result<ProgressEvent, ProgressLogError>>,
    },
    /// Fire-and-forget append
    AppendAsync { event: AppendProgress },
    /// Raw events for a task with seq greater than `since_seq`
    GetEvents {
        task_id: String,
        since_seq: u64,
        reply: RpcReplyPort<Vec<ProgressEvent>>,
    },
    /// Folded latest-state-per-step view of a task
    GetStepProgress {
        task_id: String,
        reply: RpcReplyPort<Vec<StepProgress>>,
    },
    /// Events so far plus a live receiver, taken atomically so nothing is
    /// missed or duplicated between the two.
    Subscribe {
        task_id: String,
        reply: RpcReplyPort<(Vec<ProgressEvent>, broadcast::Receiver<ProgressEvent>)>,
    },
    /// Drop every event of a task
    Forget { task_id: String },
}

// ============================================================================
// Data Types
// ============================================================================

/// Event to append; the log assigns `seq` and `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendProgress {
    pub task_id: String,
    pub step: String,
    pub status: String,
    pub data: DataMap,
}

impl AppendProgress {
    pub fn new(
        task_id: impl Into<String>,
        step: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            step: step.into(),
            status: status.into(),
            data: DataMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl serde::Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.data.insert(key.into(), value);
        self
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProgressLogError {
    #[error("progress event is missing a task id")]
    MissingTaskId,
    #[error("progress event is missing a step key")]
    MissingStep,
}

/// Fold events into one entry per step, ordered by first appearance.
pub fn fold_progress(events: &[ProgressEvent]) -> Vec<StepProgress> {
    let mut steps: Vec<StepProgress> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for event in events {
        match index.get(event.step.as_str()) {
            Some(&i) => {
                let step = &mut steps[i];
                if event.seq >= step.last_seq {
                    step.status = event.status.clone();
                    step.last_seq = event.seq;
                    step.updated_at = event.timestamp;
                }
                for (key, value) in &event.data {
                    step.data.insert(key.clone(), value.clone());
                }
            }
            None => {
                index.insert(event.step.as_str(), steps.len());
                steps.push(StepProgress {
                    step: event.step.clone(),
                    status: event.status.clone(),
                    first_seq: event.seq,
                    last_seq: event.seq,
                    updated_at: event.timestamp,
                    data: event.data.clone(),
                });
            }
        }
    }
    steps
}

#[async_trait]
impl Actor for ProgressLogActor {
    type Msg = ProgressLogMsg;
    type State = ProgressLogState;
    type Arguments = ProgressLogArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "ProgressLogActor starting");
        let (live, _) = broadcast::channel(args.subscriber_capacity.max(1));
        Ok(ProgressLogState {
            events: HashMap::new(),
            live,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ProgressLogMsg::Append { event, reply } => {
                let _ = reply.send(self.handle_append(event, state));
            }
            ProgressLogMsg::AppendAsync { event } => {
                if let Err(err) = self.handle_append(event, state) {
                    tracing::warn!(error = %err, "Dropped malformed progress event");
                }
            }
            ProgressLogMsg::GetEvents {
                task_id,
                since_seq,
                reply,
            } => {
                let events = state
                    .events
                    .get(&task_id)
                    .map(|events| {
                        events
                            .iter()
                            .filter(|e| e.seq > since_seq)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = reply.send(events);
            }
            ProgressLogMsg::GetStepProgress { task_id, reply } => {
                let folded = state
                    .events
                    .get(&task_id)
                    .map(|events| fold_progress(events))
                    .unwrap_or_default();
                let _ = reply.send(folded);
            }
            ProgressLogMsg::Subscribe { task_id, reply } => {
                let backlog = state.events.get(&task_id).cloned().unwrap_or_default();
                let _ = reply.send((backlog, state.live.subscribe()));
            }
            ProgressLogMsg::Forget { task_id } => {
                if let Some(events) = state.events.remove(&task_id) {
                    tracing::debug!(task_id = %task_id, dropped = events.len(), "Progress log forgotten");
                }
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "ProgressLogActor stopped");
        Ok(())
    }
}

impl ProgressLogActor {
    fn handle_append(
        &self,
        msg: AppendProgress,
        state: &mut ProgressLogState,
    ) -> Result<ProgressEvent, ProgressLogError> {
        if msg.task_id.trim().is_empty() {
            return Err(ProgressLogError::MissingTaskId);
        }
        if msg.step.trim().is_empty() {
            return Err(ProgressLogError::MissingStep);
        }

        let log = state.events.entry(msg.task_id.clone()).or_default();
        let event = ProgressEvent {
            task_id: msg.task_id,
            step: msg.step,
            seq: log.len() as u64 + 1,
            status: msg.status,
            timestamp: Utc::now(),
            data: msg.data,
        };
        log.push(event.clone());

        tracing::debug!(
            task_id = %event.task_id,
            step = %event.step,
            seq = event.seq,
            status = %event.status,
            "Progress event appended"
        );
        // No receivers is fine.
        let _ = state.live.send(event.clone());
        Ok(event)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

pub async fn append_progress(
    log: &ActorRef<ProgressLogMsg>,
    event: AppendProgress,
) -> Result<Result<ProgressEvent, ProgressLogError>, ractor::RactorErr<ProgressLogMsg>> {
    ractor::call!(log, |reply| ProgressLogMsg::Append { event, reply })
}

pub async fn get_events(
    log: &ActorRef<ProgressLogMsg>,
    task_id: impl Into<String>,
    since_seq: u64,
) -> Result<Vec<ProgressEvent>, ractor::RactorErr<ProgressLogMsg>> {
    ractor::call!(log, |reply| ProgressLogMsg::GetEvents {
        task_id: task_id.into(),
        since_seq,
        reply,
    })
}

pub async fn get_step_progress(
    log: &ActorRef<ProgressLogMsg>,
    task_id: impl Into<String>,
) -> Result<Vec<StepProgress>, ractor::RactorErr<ProgressLogMsg>> {
    ractor::call!(log, |reply| ProgressLogMsg::GetStepProgress {
        task_id: task_id.into(),
        reply,
    })
}

pub async fn subscribe(
    log: &ActorRef<ProgressLogMsg>,
    task_id: impl Into<String>,
) -> Result<(Vec<ProgressEvent>, broadcast::Receiver<ProgressEvent>), ractor::RactorErr<ProgressLogMsg>>
{
    ractor::call!(log, |reply| ProgressLogMsg::Subscribe {
        task_id: task_id.into(),
        reply,
    })
}

pub fn forget(
    log: &ActorRef<ProgressLogMsg>,
    task_id: impl Into<String>,
) -> Result<(), ractor::MessagingErr<ProgressLogMsg>> {
    log.send_message(ProgressLogMsg::Forget {
        task_id: task_id.into(),
    })
}

// ============================================================================
// Tests
// ============================================================================
