//! TaskActor progress emission
//!
//! Every phase transition is appended to the progress log. Subtask phases are
//! keyed per subtask (`negotiating:1`, `paying:2`, ...) so folding keeps one
//! entry per subtask phase; task-level steps use the bare step name.

use ractor::ActorRef;
use shared_types::{
    Escrow, VerificationResult, PROGRESS_CANCELLED, PROGRESS_COMPLETED, PROGRESS_FAILED,
    PROGRESS_RUNNING, PROGRESS_STARTED, PROGRESS_WAITING, STEP_EXECUTING, STEP_FALLBACK,
    STEP_HUMAN_REVIEW, STEP_NEGOTIATING, STEP_ORCHESTRATOR, STEP_PAYING, STEP_PLANNING,
    STEP_SETTLEMENT, STEP_VERIFYING,
};

use crate::actors::progress_log::{AppendProgress, ProgressLogMsg};
use crate::error::OrchestratorError;
use crate::verification::PendingReview;

/// Step key for a phase of the subtask at `index` (0-based).
pub fn subtask_step(step: &str, index: usize) -> String {
    format!("{step}:{}", index + 1)
}

/// Fire-and-forget append. Mailbox order keeps one task's events ordered.
pub fn emit(log: &ActorRef<ProgressLogMsg>, event: AppendProgress) {
    if let Err(e) = log.send_message(ProgressLogMsg::AppendAsync { event }) {
        tracing::warn!(error = %e, "Progress log unavailable; event dropped");
    }
}

pub fn emit_task_started(log: &ActorRef<ProgressLogMsg>, task_id: &str, description: &str) {
    emit(
        log,
        AppendProgress::new(task_id, STEP_ORCHESTRATOR, PROGRESS_STARTED)
            .with("description", description),
    );
}

pub fn emit_planning_started(log: &ActorRef<ProgressLogMsg>, task_id: &str) {
    emit(log, AppendProgress::new(task_id, STEP_PLANNING, PROGRESS_STARTED));
}

pub fn emit_planning_completed(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    subtasks: &[(String, String)],
) {
    let listed: Vec<serde_json::Value> = subtasks
        .iter()
        .map(|(id, capability)| serde_json::json!({ "subtask_id": id, "capability": capability }))
        .collect();
    emit(
        log,
        AppendProgress::new(task_id, STEP_PLANNING, PROGRESS_COMPLETED)
            .with("subtask_count", subtasks.len())
            .with("subtasks", listed),
    );
}

pub fn emit_negotiation_started(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    capability: &str,
    budget_remaining: u64,
    excluded: &[String],
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_NEGOTIATING, index), PROGRESS_STARTED)
            .with("capability", capability)
            .with("budget_remaining", budget_remaining)
            .with("excluded_agents", excluded),
    );
}

pub fn emit_agent_selected(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    ranked: &[String],
    agent_id: &str,
    price: u64,
    attempt: u32,
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_NEGOTIATING, index), PROGRESS_COMPLETED)
            .with("ranked_candidates", ranked)
            .with("selected_agent", agent_id)
            .with("price", price)
            .with("attempt", attempt),
    );
}

pub fn emit_escrow_authorized(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    escrow: &Escrow,
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_PAYING, index), PROGRESS_COMPLETED)
            .with("payment_id", &escrow.payment_id)
            .with("payee", &escrow.payee)
            .with("amount", escrow.amount)
            .with("escrow_state", escrow.state),
    );
}

pub fn emit_execution_started(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    agent_id: &str,
    attempt: u32,
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_EXECUTING, index), PROGRESS_STARTED)
            .with("agent_id", agent_id)
            .with("attempt", attempt),
    );
}

pub fn emit_execution_completed(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    agent_id: &str,
    calls: u32,
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_EXECUTING, index), PROGRESS_COMPLETED)
            .with("agent_id", agent_id)
            .with("calls", calls),
    );
}

pub fn emit_verification(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    result: &VerificationResult,
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_VERIFYING, index), PROGRESS_COMPLETED)
            .with("agent_id", &result.agent_id)
            .with("aggregate_score", result.aggregate_score)
            .with("dimension_scores", &result.dimension_scores)
            .with("ethics_passed", result.ethics_passed)
            .with("decision", result.decision),
    );
}

pub fn emit_review_opened(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    review: &PendingReview,
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_HUMAN_REVIEW, index), PROGRESS_WAITING)
            .with("review_id", &review.review_id)
            .with("deadline", review.deadline.to_rfc3339()),
    );
}

pub fn emit_review_resolved(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    result: &VerificationResult,
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_HUMAN_REVIEW, index), PROGRESS_COMPLETED)
            .with("reviewer_decision", result.reviewer_decision)
            .with("rejection_reason", &result.rejection_reason),
    );
}

pub fn emit_fallback(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    index: usize,
    failed_agent: Option<&str>,
    reason: &str,
) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_FALLBACK, index), PROGRESS_RUNNING)
            .with("failed_agent", failed_agent)
            .with("reason", reason),
    );
}

pub fn emit_escrow_resolved(log: &ActorRef<ProgressLogMsg>, task_id: &str, index: usize, escrow: &Escrow) {
    emit(
        log,
        AppendProgress::new(task_id, subtask_step(STEP_SETTLEMENT, index), PROGRESS_COMPLETED)
            .with("payment_id", &escrow.payment_id)
            .with("payee", &escrow.payee)
            .with("amount", escrow.amount)
            .with("escrow_state", escrow.state),
    );
}

/// Failure of one phase; `step` is the full step key.
pub fn emit_step_failed(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    step: &str,
    error: &OrchestratorError,
) {
    emit(
        log,
        AppendProgress::new(task_id, step, PROGRESS_FAILED)
            .with("error", error.to_task_error()),
    );
}

pub fn emit_task_completed(
    log: &ActorRef<ProgressLogMsg>,
    task_id: &str,
    spent: u64,
    result: &serde_json::Value,
) {
    emit(
        log,
        AppendProgress::new(task_id, STEP_ORCHESTRATOR, PROGRESS_COMPLETED)
            .with("spent_to_date", spent)
            .with("result", result),
    );
}

pub fn emit_task_failed(log: &ActorRef<ProgressLogMsg>, task_id: &str, error: &OrchestratorError) {
    emit_step_failed(log, task_id, STEP_ORCHESTRATOR, error);
}

pub fn emit_task_cancelled(log: &ActorRef<ProgressLogMsg>, task_id: &str, reason: &str) {
    emit(
        log,
        AppendProgress::new(task_id, STEP_ORCHESTRATOR, PROGRESS_CANCELLED).with("reason", reason),
    );
}
