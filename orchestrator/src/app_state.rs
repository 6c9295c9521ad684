use chrono::{DateTime, Utc};
use ractor::Actor;
use shared_types::{
    AckResponse, CreateTaskRequest, CreateTaskResponse, Escrow, HumanDecisionRequest,
    ProgressEvent, TaskSnapshot, TaskStatus, TaskStatusResponse,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::actors::progress_log::{self, ProgressLogActor, ProgressLogArguments};
use crate::actors::task::{spawn_task, TaskHandle, TaskMsg, TaskServices, TaskSettings};
use crate::config::OrchestratorConfig;
use crate::directory::{CachedAgentDirectory, SharedAgentDirectory};
use crate::error::OrchestratorError;
use crate::invoker::{AdapterRegistry, CapabilityInvoker};
use crate::payments::{PaymentCoordinator, SharedEscrowLedger};
use crate::planning::SharedTaskPlanner;
use crate::ranking::{split_capabilities, RankingEngine};
use crate::verification::{SharedQualityScorer, VerificationGate};

/// External collaborators the orchestrator is wired to.
pub struct Collaborators {
    pub directory: SharedAgentDirectory,
    pub ledger: SharedEscrowLedger,
    pub adapters: AdapterRegistry,
    pub scorer: SharedQualityScorer,
    pub planner: SharedTaskPlanner,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    services: TaskServices,
    tasks: RwLock<HashMap<String, TaskHandle>>,
    /// How long finished tasks stay queryable; zero keeps them forever.
    retention: Duration,
    refund_sweeper: Option<JoinHandle<()>>,
    janitor: Option<JoinHandle<()>>,
}

impl Drop for AppStateInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.refund_sweeper.take() {
            sweeper.abort();
        }
        if let Some(janitor) = self.janitor.take() {
            janitor.abort();
        }
        self.services.progress_log.stop(None);
    }
}

impl AppState {
    /// Spawn the progress log, assemble the shared task services and start
    /// the background refund sweeper and task janitor.
    pub async fn start(
        config: &OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        let (progress_log, _handle) = Actor::spawn(
            None,
            ProgressLogActor,
            ProgressLogArguments {
                subscriber_capacity: config.server.event_buffer,
            },
        )
        .await
        .map_err(|e| OrchestratorError::Internal(format!("failed to spawn progress log: {e}")))?;

        let directory: SharedAgentDirectory = Arc::new(CachedAgentDirectory::new(
            collaborators.directory,
            config.directory.cache_ttl(),
            config.directory.lookup_timeout(),
        ));
        let payments = Arc::new(PaymentCoordinator::new(
            collaborators.ledger,
            config.payments.backoff(),
            config.payments.call_timeout(),
        ));
        let sweep_interval = config.orchestrator.refund_sweep_interval();
        let refund_sweeper =
            (!sweep_interval.is_zero()).then(|| payments.spawn_refund_sweeper(sweep_interval));

        let services = TaskServices {
            planner: collaborators.planner,
            ranking: Arc::new(RankingEngine::new(
                directory,
                config.directory.lookup_timeout(),
            )),
            payments,
            invoker: Arc::new(CapabilityInvoker::new(
                collaborators.adapters,
                config.invoker.backoff(),
                config.invoker.call_timeout(),
            )),
            verifier: Arc::new(VerificationGate::from_config(
                collaborators.scorer,
                &config.verification,
            )),
            progress_log,
            settings: TaskSettings::from_config(config),
        };

        let retention = config.orchestrator.task_retention();
        let inner = Arc::new_cyclic(|weak: &Weak<AppStateInner>| AppStateInner {
            services,
            tasks: RwLock::new(HashMap::new()),
            retention,
            refund_sweeper,
            janitor: (!retention.is_zero()).then(|| spawn_janitor(weak.clone(), retention)),
        });
        Ok(Self { inner })
    }

    pub fn payments(&self) -> Arc<PaymentCoordinator> {
        self.inner.services.payments.clone()
    }

    async fn handle(&self, task_id: &str) -> Result<TaskHandle, OrchestratorError> {
        self.inner
            .tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))
    }

    pub async fn ensure_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        self.handle(task_id).await.map(|_| ())
    }

    pub async fn create_task(
        &self,
        request: CreateTaskRequest,
    ) -> Result<CreateTaskResponse, OrchestratorError> {
        validate_request(&request)?;

        let task_id = format!("task_{}", ulid::Ulid::new());
        self.inner
            .services
            .payments
            .register_task(&task_id, request.budget_limit)?;

        tracing::info!(
            task_id = %task_id,
            budget_limit = request.budget_limit,
            min_reputation = request.min_reputation_score,
            mode = ?request.verification_mode,
            "Creating task"
        );
        let handle = spawn_task(task_id.clone(), request, self.inner.services.clone()).await?;
        let status = handle.current().status;
        self.inner
            .tasks
            .write()
            .await
            .insert(task_id.clone(), handle);

        Ok(CreateTaskResponse { task_id, status })
    }

    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse, OrchestratorError> {
        let snapshot = self.handle(task_id).await?.current();
        let progress = progress_log::get_step_progress(&self.inner.services.progress_log, task_id)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("progress log unavailable: {e}")))?;

        Ok(TaskStatusResponse {
            task_id: snapshot.task_id.clone(),
            status: snapshot.status,
            progress,
            result: snapshot.result.clone(),
            error: snapshot.error.clone(),
            task: snapshot,
        })
    }

    /// Every known task, newest first.
    pub async fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = self
            .inner
            .tasks
            .read()
            .await
            .values()
            .map(TaskHandle::current)
            .collect();
        snapshots.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.task_id.cmp(&a.task_id))
        });
        snapshots
    }

    pub async fn submit_decision(
        &self,
        task_id: &str,
        decision: HumanDecisionRequest,
    ) -> Result<AckResponse, OrchestratorError> {
        let handle = self.handle(task_id).await?;
        let stale = || OrchestratorError::StaleDecision(format!("no pending review for task {task_id}"));
        if handle.current().status != TaskStatus::PendingHuman {
            return Err(stale());
        }

        let HumanDecisionRequest {
            decision,
            reason,
            review_id,
        } = decision;
        ractor::call!(handle.actor, |reply| TaskMsg::SubmitDecision {
            decision,
            reason,
            review_id,
            reply,
        })
        // The actor finished between the status check and the call.
        .map_err(|_| stale())??;

        Ok(AckResponse {
            task_id: task_id.to_string(),
            accepted: true,
            message: format!("decision '{}' recorded", decision.as_str()),
        })
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<AckResponse, OrchestratorError> {
        let handle = self.handle(task_id).await?;
        let status = handle.current().status;
        if status.is_terminal() {
            return Ok(AckResponse {
                task_id: task_id.to_string(),
                accepted: false,
                message: format!("task already {status}"),
            });
        }

        let accepted = handle
            .actor
            .cast(TaskMsg::Cancel {
                reason: Some("cancelled by request".to_string()),
            })
            .is_ok();
        Ok(AckResponse {
            task_id: task_id.to_string(),
            accepted,
            message: if accepted {
                "cancellation requested".to_string()
            } else {
                format!("task already {}", handle.current().status)
            },
        })
    }

    /// Events so far plus a live feed for one task.
    pub async fn subscribe(
        &self,
        task_id: &str,
    ) -> Result<(Vec<ProgressEvent>, broadcast::Receiver<ProgressEvent>), OrchestratorError> {
        self.ensure_task(task_id).await?;
        progress_log::subscribe(&self.inner.services.progress_log, task_id)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("progress log unavailable: {e}")))
    }

    /// Raw progress events of a task with seq greater than `since_seq`.
    pub async fn events_since(
        &self,
        task_id: &str,
        since_seq: u64,
    ) -> Result<Vec<ProgressEvent>, OrchestratorError> {
        self.ensure_task(task_id).await?;
        progress_log::get_events(&self.inner.services.progress_log, task_id, since_seq)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("progress log unavailable: {e}")))
    }

    pub async fn payments_for(&self, task_id: &str) -> Result<Vec<Escrow>, OrchestratorError> {
        self.ensure_task(task_id).await?;
        Ok(self.inner.services.payments.escrows_for_task(task_id))
    }

    /// Archive terminal tasks that finished more than the retention period
    /// before `now`, along with their progress events and escrow records.
    /// A task with a refund still outstanding is kept until it settles.
    /// Returns the number evicted.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        if self.inner.retention.is_zero() {
            return 0;
        }
        let Ok(retention) = chrono::Duration::from_std(self.inner.retention) else {
            return 0;
        };
        let cutoff = now - retention;

        let mut tasks = self.inner.tasks.write().await;
        let expired: Vec<String> = tasks
            .values()
            .map(TaskHandle::current)
            .filter(|snapshot| snapshot.status.is_terminal())
            .filter(|snapshot| snapshot.completed_at.is_some_and(|done| done <= cutoff))
            .map(|snapshot| snapshot.task_id)
            .collect();

        let mut evicted = 0;
        for task_id in expired {
            if !self.inner.services.payments.forget_task(&task_id) {
                tracing::debug!(task_id = %task_id, "Eviction deferred until refunds settle");
                continue;
            }
            tasks.remove(&task_id);
            if let Err(err) = progress_log::forget(&self.inner.services.progress_log, &task_id) {
                tracing::warn!(task_id = %task_id, error = %err, "Progress log unavailable for eviction");
            }
            evicted += 1;
        }
        if evicted > 0 {
            tracing::info!(evicted, remaining = tasks.len(), "Evicted finished tasks");
        }
        evicted
    }
}

fn spawn_janitor(inner: Weak<AppStateInner>, retention: Duration) -> JoinHandle<()> {
    let period = retention.min(Duration::from_secs(60));
    tokio::spawn(async move {
        // The first sweep waits a full period; `inner` is still being built now.
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            AppState { inner }.evict_expired(Utc::now()).await;
        }
    })
}

fn validate_request(request: &CreateTaskRequest) -> Result<(), OrchestratorError> {
    if request.description.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest(
            "description must not be empty".to_string(),
        ));
    }
    if request.budget_limit == 0 {
        return Err(OrchestratorError::InvalidRequest(
            "budget_limit must be positive".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&request.min_reputation_score) {
        return Err(OrchestratorError::InvalidRequest(format!(
            "min_reputation_score must be within [0, 1], got {}",
            request.min_reputation_score
        )));
    }
    if let Some(requirements) = &request.capability_requirements {
        if split_capabilities(requirements).is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "capability_requirements lists no capability".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::VerificationMode;

    fn request() -> CreateTaskRequest {
        CreateTaskRequest {
            description: "Map the field".to_string(),
            budget_limit: 100,
            min_reputation_score: 0.7,
            verification_mode: VerificationMode::Standard,
            capability_requirements: None,
        }
    }

    #[test]
    fn test_validate_request() {
        assert!(validate_request(&request()).is_ok());

        let mut blank = request();
        blank.description = "   ".to_string();
        assert!(matches!(
            validate_request(&blank),
            Err(OrchestratorError::InvalidRequest(_))
        ));

        let mut broke = request();
        broke.budget_limit = 0;
        assert!(validate_request(&broke).is_err());

        let mut reputation = request();
        reputation.min_reputation_score = 1.5;
        assert!(validate_request(&reputation).is_err());
        reputation.min_reputation_score = f64::NAN;
        assert!(validate_request(&reputation).is_err());

        let mut tags = request();
        tags.capability_requirements = Some(" , ".to_string());
        assert!(validate_request(&tags).is_err());
    }
}
