use async_trait::async_trait;
use ractor::{Actor, ActorRef};
use shared_types::{
    AgentCandidate, AgentStatus, CreateTaskRequest, StepProgress, TaskSnapshot, TaskStatus,
    VerificationMode,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::actors::progress_log::{
    get_step_progress, ProgressLogActor, ProgressLogArguments, ProgressLogMsg,
};
use crate::actors::task::{spawn_task, TaskHandle, TaskServices, TaskSettings};
use crate::directory::InMemoryAgentDirectory;
use crate::invoker::{AdapterRegistry, CallError, CapabilityAdapter, CapabilityInvoker};
use crate::payments::{InMemoryLedger, PaymentCoordinator};
use crate::planning::{SharedTaskPlanner, SingleStepPlanner};
use crate::ranking::RankingEngine;
use crate::retry::BackoffPolicy;
use crate::verification::{
    QualityScorer, ScorerError, ScoringRequest, VerificationGate, VerificationPolicy,
};

pub(crate) const PROTOCOL: &str = "scripted";

pub(crate) fn agent(id: &str, reputation: f64, price: u64) -> AgentCandidate {
    AgentCandidate {
        agent_id: id.to_string(),
        capability_set: vec!["research".to_string()],
        reputation_score: reputation,
        price,
        status: AgentStatus::Active,
        endpoint: String::new(),
        protocol: PROTOCOL.to_string(),
    }
}

pub(crate) fn request(budget_limit: u64) -> CreateTaskRequest {
    CreateTaskRequest {
        description: "Survey recent work on escrowed agent marketplaces".to_string(),
        budget_limit,
        min_reputation_score: 0.7,
        verification_mode: VerificationMode::Standard,
        capability_requirements: Some("research".to_string()),
    }
}

pub(crate) fn scores(quality: f64, ethics: f64) -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("quality".to_string(), quality),
        ("ethics".to_string(), ethics),
    ])
}

pub(crate) fn test_policy() -> VerificationPolicy {
    VerificationPolicy {
        auto_approve_threshold: 75.0,
        enhanced_auto_approve_threshold: 90.0,
        reject_floor: 50.0,
        hard_constraint: "ethics".to_string(),
        hard_constraint_floor: 90.0,
        weights: BTreeMap::from([("quality".to_string(), 1.0)]),
        review_timeout: Duration::from_secs(1800),
    }
}

/// Answers per agent from a script, defaulting to a small success payload.
/// When gated, each call announces itself and waits to be released.
#[derive(Default)]
pub(crate) struct ScriptedAdapter {
    script: Mutex<HashMap<String, VecDeque<Result<serde_json::Value, CallError>>>>,
    inputs: Mutex<Vec<(String, serde_json::Value)>>,
    gated: AtomicBool,
    pub started: Notify,
    pub release: Notify,
}

impl ScriptedAdapter {
    pub fn push(&self, agent_id: &str, response: Result<serde_json::Value, CallError>) {
        self.script
            .lock()
            .unwrap()
            .entry(agent_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn inputs(&self) -> Vec<(String, serde_json::Value)> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityAdapter for ScriptedAdapter {
    async fn call(
        &self,
        agent: &AgentCandidate,
        input: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value, CallError> {
        self.inputs
            .lock()
            .unwrap()
            .push((agent.agent_id.clone(), input.clone()));
        if self.gated.load(Ordering::SeqCst) {
            self.started.notify_one();
            self.release.notified().await;
        }
        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(&agent.agent_id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            Ok(serde_json::json!({
                "agent_id": agent.agent_id,
                "summary": format!("findings from {}", agent.agent_id),
            }))
        })
    }
}

/// Scores keyed by the `agent_id` echoed in the output.
#[derive(Default)]
pub(crate) struct ScriptedScorer {
    by_agent: Mutex<HashMap<String, BTreeMap<String, f64>>>,
    failures: AtomicUsize,
}

impl ScriptedScorer {
    pub fn set(&self, agent_id: &str, scores: BTreeMap<String, f64>) {
        self.by_agent
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), scores);
    }

    pub fn fail_next(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl QualityScorer for ScriptedScorer {
    async fn score(
        &self,
        request: &ScoringRequest,
    ) -> Result<BTreeMap<String, f64>, ScorerError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ScorerError::Unavailable("scorer offline".to_string()));
        }
        let agent_id = request.output["agent_id"].as_str().unwrap_or_default();
        Ok(self
            .by_agent
            .lock()
            .unwrap()
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| scores(90.0, 100.0)))
    }
}

pub(crate) struct Harness {
    pub services: TaskServices,
    pub ledger: Arc<InMemoryLedger>,
    pub payments: Arc<PaymentCoordinator>,
    pub adapter: Arc<ScriptedAdapter>,
    pub scorer: Arc<ScriptedScorer>,
    pub log: ActorRef<ProgressLogMsg>,
}

pub(crate) struct HarnessOptions {
    pub settings: TaskSettings,
    pub policy: VerificationPolicy,
    pub planner: SharedTaskPlanner,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            settings: TaskSettings {
                invoke_timeout: Duration::from_secs(5),
                ..TaskSettings::default()
            },
            policy: test_policy(),
            planner: Arc::new(SingleStepPlanner::default()),
        }
    }
}

pub(crate) async fn setup_test_harness(agents: Vec<AgentCandidate>) -> Harness {
    setup_test_harness_with(agents, HarnessOptions::default()).await
}

pub(crate) async fn setup_test_harness_with(
    agents: Vec<AgentCandidate>,
    options: HarnessOptions,
) -> Harness {
    let (log, _log_handle) = Actor::spawn(
        None,
        ProgressLogActor,
        ProgressLogArguments::default(),
    )
    .await
    .unwrap();

    let fast = BackoffPolicy::new(3, 1, 5);
    let directory = Arc::new(InMemoryAgentDirectory::new(agents));
    let ledger = Arc::new(InMemoryLedger::new());
    let payments = Arc::new(PaymentCoordinator::new(
        ledger.clone(),
        fast,
        Duration::from_secs(1),
    ));
    let adapter = Arc::new(ScriptedAdapter::default());
    let mut registry = AdapterRegistry::new();
    registry.register(PROTOCOL, adapter.clone());
    let scorer = Arc::new(ScriptedScorer::default());

    let services = TaskServices {
        planner: options.planner,
        ranking: Arc::new(RankingEngine::new(directory, Duration::from_secs(1))),
        payments: payments.clone(),
        invoker: Arc::new(CapabilityInvoker::new(
            registry,
            fast,
            Duration::from_secs(5),
        )),
        verifier: Arc::new(VerificationGate::new(
            scorer.clone(),
            options.policy,
            fast,
            Duration::from_secs(1),
        )),
        progress_log: log.clone(),
        settings: options.settings,
    };

    Harness {
        services,
        ledger,
        payments,
        adapter,
        scorer,
        log,
    }
}

impl Harness {
    pub async fn start(&self, request: CreateTaskRequest) -> TaskHandle {
        let task_id = format!("task_{}", ulid::Ulid::new());
        self.payments
            .register_task(&task_id, request.budget_limit)
            .unwrap();
        spawn_task(task_id, request, self.services.clone())
            .await
            .unwrap()
    }

    pub async fn progress(&self, task_id: &str) -> Vec<StepProgress> {
        get_step_progress(&self.log, task_id).await.unwrap()
    }
}

pub(crate) async fn wait_for_status(handle: &TaskHandle, status: TaskStatus) -> TaskSnapshot {
    wait_until(handle, |s| s.status == status).await
}

pub(crate) async fn wait_terminal(handle: &TaskHandle) -> TaskSnapshot {
    wait_until(handle, |s| s.status.is_terminal()).await
}

async fn wait_until(handle: &TaskHandle, pred: impl Fn(&TaskSnapshot) -> bool) -> TaskSnapshot {
    let mut rx = handle.snapshot.clone();
    let snapshot = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| pred(s)))
        .await
        .expect("task did not reach the expected state in time")
        .expect("snapshot channel closed")
        .clone();
    snapshot
}

pub(crate) fn step<'a>(progress: &'a [StepProgress], key: &str) -> &'a StepProgress {
    progress
        .iter()
        .find(|s| s.step == key)
        .unwrap_or_else(|| panic!("no progress for step {key}: {progress:?}"))
}
