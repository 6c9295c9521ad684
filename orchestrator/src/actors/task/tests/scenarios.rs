use ractor::call;
use shared_types::{
    ErrorKind, EscrowState, ReviewerDecision, SubtaskStatus, TaskStatus, VerificationDecision,
};
use std::sync::Arc;
use std::time::Duration;

use crate::actors::task::{TaskMsg, TaskSettings};
use crate::config::SubtaskFailurePolicy;
use crate::error::OrchestratorError;
use crate::invoker::CallError;
use crate::payments::{LedgerError, LedgerOp};
use crate::planning::{StaticPlanner, SubtaskSpec};

use super::support::{
    agent, request, scores, setup_test_harness, setup_test_harness_with, step, test_policy,
    wait_for_status, wait_terminal, HarnessOptions,
};

fn escrow_states(harness: &super::support::Harness, task_id: &str) -> Vec<(String, EscrowState)> {
    harness
        .payments
        .escrows_for_task(task_id)
        .into_iter()
        .map(|e| (e.payee, e.state))
        .collect()
}

#[tokio::test]
async fn test_happy_path_completes_and_releases_once() {
    let harness =
        setup_test_harness(vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)]).await;
    harness.scorer.set("alpha", scores(90.0, 100.0));

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Complete);
    assert_eq!(snapshot.subtasks.len(), 1);
    let subtask = &snapshot.subtasks[0];
    assert_eq!(subtask.status, SubtaskStatus::Completed);
    assert_eq!(subtask.assigned_agent_id.as_deref(), Some("alpha"));
    assert_eq!(subtask.cost, 100);
    assert_eq!(subtask.attempt_count, 1);
    assert_eq!(subtask.verifications[0].decision, VerificationDecision::AutoApprove);
    assert_eq!(snapshot.spent_to_date, 100);
    assert!(snapshot.completed_at.is_some());
    assert!(snapshot.error.is_none());
    let result = snapshot.result.expect("result");
    assert_eq!(result["output"]["agent_id"], "alpha");
    assert_eq!(result["total_cost"], 100);

    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![("alpha".to_string(), EscrowState::Released)]
    );
    let effects = harness.ledger.effects();
    assert_eq!((effects.holds, effects.settles, effects.cancels), (1, 1, 0));

    let progress = harness.progress(&handle.task_id).await;
    assert_eq!(step(&progress, "planning").status, "completed");
    let negotiating = step(&progress, "negotiating:1");
    assert_eq!(negotiating.data["selected_agent"], "alpha");
    assert_eq!(
        negotiating.data["ranked_candidates"],
        serde_json::json!(["alpha", "beta"])
    );
    assert_eq!(step(&progress, "settlement:1").data["escrow_state"], "RELEASED");
    assert_eq!(step(&progress, "orchestrator").status, "completed");
}

#[tokio::test]
async fn test_human_reject_falls_back_to_next_agent() {
    let harness =
        setup_test_harness(vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)]).await;
    harness.scorer.set("alpha", scores(60.0, 100.0));
    harness.scorer.set("beta", scores(88.0, 100.0));

    let handle = harness.start(request(1_000)).await;
    let pending = wait_for_status(&handle, TaskStatus::PendingHuman).await;
    assert_eq!(pending.subtasks[0].status, SubtaskStatus::PendingHuman);
    assert_eq!(pending.current_step.as_deref(), Some("human_review:1"));

    let ack = call!(handle.actor, |reply| TaskMsg::SubmitDecision {
        decision: ReviewerDecision::Reject,
        reason: Some("misses the brief".to_string()),
        review_id: None,
        reply,
    })
    .unwrap();
    assert!(ack.is_ok());

    let snapshot = wait_terminal(&handle).await;
    assert_eq!(snapshot.status, TaskStatus::Complete);
    let subtask = &snapshot.subtasks[0];
    assert_eq!(subtask.assigned_agent_id.as_deref(), Some("beta"));
    assert_eq!(subtask.failed_agents, vec!["alpha".to_string()]);
    assert_eq!(subtask.attempt_count, 2);
    assert_eq!(subtask.verifications.len(), 2);
    assert_eq!(
        subtask.verifications[0].reviewer_decision,
        Some(ReviewerDecision::Reject)
    );
    assert_eq!(
        subtask.verifications[0].rejection_reason.as_deref(),
        Some("misses the brief")
    );
    assert_eq!(snapshot.spent_to_date, 80);

    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![
            ("alpha".to_string(), EscrowState::Refunded),
            ("beta".to_string(), EscrowState::Released),
        ]
    );
    assert_eq!(harness.ledger.held_total(), 0);

    let progress = harness.progress(&handle.task_id).await;
    assert_eq!(step(&progress, "fallback:1").data["failed_agent"], "alpha");
    assert_eq!(step(&progress, "human_review:1").data["reviewer_decision"], "reject");
}

#[tokio::test]
async fn test_reject_floor_exhausts_fallbacks() {
    let harness =
        setup_test_harness(vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)]).await;
    harness.scorer.set("alpha", scores(30.0, 100.0));
    harness.scorer.set("beta", scores(42.0, 100.0));

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Failed);
    let error = snapshot.error.expect("error");
    assert_eq!(error.kind, ErrorKind::ExecutionPermanent);
    assert!(error.message.contains("reject floor"), "{}", error.message);
    assert!(error.retryable);

    let subtask = &snapshot.subtasks[0];
    assert_eq!(subtask.status, SubtaskStatus::Failed);
    assert_eq!(subtask.failed_agents, vec!["alpha".to_string(), "beta".to_string()]);
    for verification in &subtask.verifications {
        assert_eq!(verification.decision, VerificationDecision::Reject);
        assert!(verification
            .rejection_reason
            .as_deref()
            .is_some_and(|r| r.contains("reject floor")));
    }

    assert!(escrow_states(&harness, &handle.task_id)
        .iter()
        .all(|(_, state)| *state == EscrowState::Refunded));
    assert_eq!(harness.ledger.effects().settles, 0);
    assert_eq!(harness.ledger.held_total(), 0);
    assert_eq!(snapshot.spent_to_date, 0);
}

#[tokio::test]
async fn test_cancel_during_execution_refunds_and_never_releases() {
    let harness = setup_test_harness(vec![agent("alpha", 0.95, 100)]).await;
    harness.adapter.gate();

    let handle = harness.start(request(1_000)).await;
    harness.adapter.started.notified().await;
    assert_eq!(handle.current().status, TaskStatus::Executing);

    handle
        .actor
        .cast(TaskMsg::Cancel {
            reason: Some("no longer needed".to_string()),
        })
        .unwrap();
    harness.adapter.release.notify_one();

    let snapshot = wait_terminal(&handle).await;
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert_eq!(snapshot.subtasks[0].status, SubtaskStatus::Cancelled);
    assert!(snapshot.subtasks[0].output.is_none());
    assert_eq!(snapshot.error.map(|e| e.kind), Some(ErrorKind::Cancelled));

    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![("alpha".to_string(), EscrowState::Refunded)]
    );
    assert_eq!(harness.ledger.effects().settles, 0);
    assert_eq!(harness.payments.released_total(&handle.task_id), 0);

    let progress = harness.progress(&handle.task_id).await;
    assert_eq!(step(&progress, "orchestrator").status, "cancelled");
}

#[tokio::test]
async fn test_ethics_floor_rejects_despite_high_quality() {
    let harness =
        setup_test_harness(vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)]).await;
    harness.scorer.set("alpha", scores(100.0, 40.0));

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Complete);
    let first = &snapshot.subtasks[0].verifications[0];
    assert_eq!(first.agent_id, "alpha");
    assert!(!first.ethics_passed);
    assert_eq!(first.decision, VerificationDecision::Reject);
    assert_eq!(snapshot.subtasks[0].assigned_agent_id.as_deref(), Some("beta"));
}

#[tokio::test(start_paused = true)]
async fn test_review_timeout_rejects() {
    let policy = crate::verification::VerificationPolicy {
        review_timeout: Duration::from_secs(5),
        ..test_policy()
    };
    let harness = setup_test_harness_with(
        vec![agent("alpha", 0.95, 100)],
        HarnessOptions {
            policy,
            ..HarnessOptions::default()
        },
    )
    .await;
    harness.scorer.set("alpha", scores(60.0, 100.0));

    let handle = harness.start(request(1_000)).await;
    wait_for_status(&handle, TaskStatus::PendingHuman).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Failed);
    let verification = &snapshot.subtasks[0].verifications[0];
    assert_eq!(verification.reviewer_decision, Some(ReviewerDecision::Reject));
    assert!(verification
        .rejection_reason
        .as_deref()
        .is_some_and(|r| r.contains("timed out")));
    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![("alpha".to_string(), EscrowState::Refunded)]
    );
}

#[tokio::test]
async fn test_reviewer_approval_releases_escrow() {
    let harness = setup_test_harness(vec![agent("alpha", 0.95, 100)]).await;
    harness.scorer.set("alpha", scores(70.0, 100.0));

    let handle = harness.start(request(1_000)).await;
    wait_for_status(&handle, TaskStatus::PendingHuman).await;
    let ack = call!(handle.actor, |reply| TaskMsg::SubmitDecision {
        decision: ReviewerDecision::Approve,
        reason: None,
        review_id: None,
        reply,
    })
    .unwrap();
    assert!(ack.is_ok());

    let snapshot = wait_terminal(&handle).await;
    assert_eq!(snapshot.status, TaskStatus::Complete);
    assert_eq!(snapshot.spent_to_date, 100);
    assert_eq!(
        snapshot.subtasks[0].verifications[0].reviewer_decision,
        Some(ReviewerDecision::Approve)
    );
}

#[tokio::test]
async fn test_enhanced_mode_sends_good_output_to_review() {
    let harness = setup_test_harness(vec![agent("alpha", 0.95, 100)]).await;
    harness.scorer.set("alpha", scores(80.0, 100.0));

    let mut enhanced = request(1_000);
    enhanced.verification_mode = shared_types::VerificationMode::Enhanced;
    let handle = harness.start(enhanced).await;

    let pending = wait_for_status(&handle, TaskStatus::PendingHuman).await;
    assert_eq!(
        pending.subtasks[0].verifications[0].decision,
        VerificationDecision::PendingHuman
    );
    handle
        .actor
        .cast(TaskMsg::Cancel { reason: None })
        .unwrap();
    let snapshot = wait_terminal(&handle).await;
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert_eq!(harness.ledger.held_total(), 0);
}

#[tokio::test]
async fn test_decision_without_pending_review_is_stale() {
    let harness = setup_test_harness(vec![agent("alpha", 0.95, 100)]).await;
    harness.adapter.gate();

    let handle = harness.start(request(1_000)).await;
    harness.adapter.started.notified().await;

    // The actor is blocked in execution; the decision queues behind it.
    let actor = handle.actor.clone();
    let decision = tokio::spawn(async move {
        call!(actor, |reply| TaskMsg::SubmitDecision {
            decision: ReviewerDecision::Approve,
            reason: None,
            review_id: None,
            reply,
        })
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.adapter.release.notify_one();

    let reply = decision.await.unwrap().unwrap();
    assert!(matches!(reply, Err(OrchestratorError::StaleDecision(_))));

    let snapshot = wait_terminal(&handle).await;
    assert_eq!(snapshot.status, TaskStatus::Complete);
}

#[tokio::test]
async fn test_over_budget_agents_are_never_selected() {
    let harness =
        setup_test_harness(vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)]).await;

    let handle = harness.start(request(90)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Complete);
    assert_eq!(snapshot.subtasks[0].assigned_agent_id.as_deref(), Some("beta"));
    assert!(harness.payments.committed_total(&handle.task_id) <= 90);
}

#[tokio::test]
async fn test_no_affordable_agent_fails_without_payment() {
    let harness = setup_test_harness(vec![agent("alpha", 0.95, 100)]).await;

    let handle = harness.start(request(50)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Failed);
    let error = snapshot.error.expect("error");
    assert_eq!(error.kind, ErrorKind::Negotiation);
    assert!(error.remediation.is_some());
    assert!(harness.payments.escrows_for_task(&handle.task_id).is_empty());
    assert_eq!(harness.ledger.calls(LedgerOp::Hold), 0);
}

#[tokio::test]
async fn test_declined_call_falls_back() {
    let harness =
        setup_test_harness(vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)]).await;
    harness
        .adapter
        .push("alpha", Err(CallError::Declined("out of scope".to_string())));

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Complete);
    assert_eq!(snapshot.subtasks[0].failed_agents, vec!["alpha".to_string()]);
    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![
            ("alpha".to_string(), EscrowState::Refunded),
            ("beta".to_string(), EscrowState::Released),
        ]
    );
}

#[tokio::test]
async fn test_attempt_limit_fails_subtask() {
    let harness = setup_test_harness_with(
        vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)],
        HarnessOptions {
            settings: TaskSettings {
                max_subtask_attempts: 1,
                ..HarnessOptions::default().settings
            },
            ..HarnessOptions::default()
        },
    )
    .await;
    harness.scorer.set("alpha", scores(20.0, 100.0));

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Failed);
    let message = snapshot.error.expect("error").message;
    assert!(message.contains("attempt limit of 1"), "{message}");
    assert_eq!(snapshot.subtasks[0].attempt_count, 1);
}

#[tokio::test]
async fn test_scorer_outage_fails_without_blaming_agent() {
    let harness =
        setup_test_harness(vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)]).await;
    harness.scorer.fail_next(10);

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.error.map(|e| e.kind), Some(ErrorKind::Verification));
    assert!(snapshot.subtasks[0].failed_agents.is_empty());
    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![("alpha".to_string(), EscrowState::Refunded)]
    );
}

#[tokio::test]
async fn test_ledger_outage_fails_task_with_nothing_held() {
    let harness = setup_test_harness(vec![agent("alpha", 0.95, 100)]).await;
    harness.ledger.fail_next(
        LedgerOp::Hold,
        10,
        LedgerError::Transient("settlement offline".to_string()),
    );

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.error.map(|e| e.kind), Some(ErrorKind::Payment));
    assert_eq!(harness.ledger.held_total(), 0);
    assert!(harness
        .payments
        .escrows_for_task(&handle.task_id)
        .iter()
        .all(|e| e.state.is_terminal() || e.state == EscrowState::Proposed));
}

fn two_step_plan() -> Arc<StaticPlanner> {
    Arc::new(StaticPlanner::new(vec![
        SubtaskSpec {
            description: "Collect sources".to_string(),
            capability_requirement: "research".to_string(),
            input: serde_json::json!({ "topic": "escrow" }),
        },
        SubtaskSpec {
            description: "Summarise sources".to_string(),
            capability_requirement: "summarization,research".to_string(),
            input: serde_json::Value::Null,
        },
    ]))
}

#[tokio::test]
async fn test_subtasks_run_in_order_with_previous_output() {
    let harness = setup_test_harness_with(
        vec![agent("alpha", 0.95, 100)],
        HarnessOptions {
            planner: two_step_plan(),
            ..HarnessOptions::default()
        },
    )
    .await;
    harness
        .adapter
        .push("alpha", Ok(serde_json::json!({ "agent_id": "alpha", "sources": 12 })));

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Complete);
    assert_eq!(snapshot.subtasks.len(), 2);
    assert!(snapshot
        .subtasks
        .iter()
        .all(|s| s.status == SubtaskStatus::Completed));
    assert_eq!(snapshot.spent_to_date, 200);

    let inputs = harness.adapter.inputs();
    assert_eq!(inputs.len(), 2);
    assert!(inputs[0].1["previous_output"].is_null());
    assert_eq!(inputs[0].1["input"]["topic"], "escrow");
    assert_eq!(inputs[1].1["previous_output"]["sources"], 12);
    assert_eq!(
        snapshot.result.expect("result")["subtasks"]
            .as_array()
            .map(Vec::len),
        Some(2)
    );
}

#[tokio::test]
async fn test_skip_policy_continues_past_failed_subtask() {
    let planner = Arc::new(StaticPlanner::new(vec![
        SubtaskSpec {
            description: "Translate".to_string(),
            capability_requirement: "translation".to_string(),
            input: serde_json::Value::Null,
        },
        SubtaskSpec {
            description: "Research".to_string(),
            capability_requirement: "research".to_string(),
            input: serde_json::Value::Null,
        },
    ]));
    let harness = setup_test_harness_with(
        vec![agent("alpha", 0.95, 100)],
        HarnessOptions {
            planner,
            settings: TaskSettings {
                failure_policy: SubtaskFailurePolicy::Skip,
                ..HarnessOptions::default().settings
            },
            ..HarnessOptions::default()
        },
    )
    .await;

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Complete);
    assert_eq!(snapshot.subtasks[0].status, SubtaskStatus::Skipped);
    assert_eq!(snapshot.subtasks[1].status, SubtaskStatus::Completed);
}

#[tokio::test]
async fn test_parallel_tasks_share_directory_but_not_budgets() {
    let harness = setup_test_harness(vec![agent("alpha", 0.95, 100)]).await;

    let mut handles = Vec::new();
    for budget in [100, 150, 200, 250] {
        handles.push(harness.start(request(budget)).await);
    }
    let finals = futures::future::join_all(handles.iter().map(wait_terminal)).await;

    for (handle, snapshot) in handles.iter().zip(&finals) {
        assert_eq!(snapshot.status, TaskStatus::Complete);
        assert_eq!(harness.payments.released_total(&handle.task_id), 100);
    }
}

#[tokio::test]
async fn test_scenario_a_single_agent_happy_path() {
    let harness = setup_test_harness(vec![agent("A", 0.9, 2)]).await;
    harness.scorer.set("A", scores(85.0, 100.0));

    let handle = harness.start(request(10)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Complete);
    assert_eq!(snapshot.spent_to_date, 2);
    let verification = &snapshot.subtasks[0].verifications[0];
    assert_eq!(verification.aggregate_score, 85.0);
    assert_eq!(verification.decision, VerificationDecision::AutoApprove);
    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![("A".to_string(), EscrowState::Released)]
    );
    assert_eq!(harness.payments.released_total(&handle.task_id), 2);
    assert_eq!(harness.payments.budget_remaining(&handle.task_id), 8);
}

#[tokio::test]
async fn test_scenario_b_failed_call_then_human_reject_fails_task() {
    let harness = setup_test_harness(vec![agent("A", 0.9, 2), agent("B", 0.8, 3)]).await;
    harness
        .adapter
        .push("A", Err(CallError::Declined("cannot serve request".to_string())));
    harness.scorer.set("B", scores(60.0, 100.0));

    let handle = harness.start(request(10)).await;
    let pending = wait_for_status(&handle, TaskStatus::PendingHuman).await;
    assert_eq!(pending.subtasks[0].assigned_agent_id.as_deref(), Some("B"));
    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![
            ("A".to_string(), EscrowState::Refunded),
            ("B".to_string(), EscrowState::Authorized),
        ]
    );

    let ack = call!(handle.actor, |reply| TaskMsg::SubmitDecision {
        decision: ReviewerDecision::Reject,
        reason: Some("not usable".to_string()),
        review_id: pending.pending_review_id.clone(),
        reply,
    })
    .unwrap();
    assert!(ack.is_ok());

    let snapshot = wait_terminal(&handle).await;
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.subtasks[0].status, SubtaskStatus::Failed);
    assert_eq!(
        snapshot.subtasks[0].failed_agents,
        vec!["A".to_string(), "B".to_string()]
    );
    assert_eq!(
        snapshot.subtasks[0].verifications[0].reviewer_decision,
        Some(ReviewerDecision::Reject)
    );
    let escrows = harness.payments.escrows_for_task(&handle.task_id);
    let amounts: Vec<(String, u64, EscrowState)> = escrows
        .into_iter()
        .map(|e| (e.payee, e.amount, e.state))
        .collect();
    assert_eq!(
        amounts,
        vec![
            ("A".to_string(), 2, EscrowState::Refunded),
            ("B".to_string(), 3, EscrowState::Refunded),
        ]
    );
    assert_eq!(snapshot.spent_to_date, 0);
    assert_eq!(harness.ledger.effects().settles, 0);
}

#[tokio::test]
async fn test_unscored_ethics_dimension_is_rejected() {
    let harness = setup_test_harness(vec![agent("alpha", 0.95, 100)]).await;
    harness.scorer.set(
        "alpha",
        std::collections::BTreeMap::from([("quality".to_string(), 95.0)]),
    );

    let handle = harness.start(request(1_000)).await;
    let snapshot = wait_terminal(&handle).await;

    assert_eq!(snapshot.status, TaskStatus::Failed);
    let verification = &snapshot.subtasks[0].verifications[0];
    assert!(!verification.ethics_passed);
    assert_eq!(verification.decision, VerificationDecision::Reject);
    assert_eq!(
        verification.rejection_reason.as_deref(),
        Some("ethics dimension missing from scores")
    );
    assert_eq!(
        escrow_states(&harness, &handle.task_id),
        vec![("alpha".to_string(), EscrowState::Refunded)]
    );
}

#[tokio::test]
async fn test_decision_for_earlier_review_is_stale() {
    let harness =
        setup_test_harness(vec![agent("alpha", 0.95, 100), agent("beta", 0.9, 80)]).await;
    harness.scorer.set("alpha", scores(60.0, 100.0));
    harness.scorer.set("beta", scores(60.0, 100.0));

    let handle = harness.start(request(1_000)).await;
    let first = wait_for_status(&handle, TaskStatus::PendingHuman).await;
    let first_review = first.pending_review_id.clone().expect("open review");

    let ack = call!(handle.actor, |reply| TaskMsg::SubmitDecision {
        decision: ReviewerDecision::Reject,
        reason: Some("off topic".to_string()),
        review_id: Some(first_review.clone()),
        reply,
    })
    .unwrap();
    assert!(ack.is_ok());

    let mut rx = handle.snapshot.clone();
    let second = rx
        .wait_for(|s| {
            s.status == TaskStatus::PendingHuman
                && s.pending_review_id.as_deref() != Some(first_review.as_str())
        })
        .await
        .unwrap()
        .clone();
    assert_eq!(second.subtasks[0].assigned_agent_id.as_deref(), Some("beta"));

    // A late approval meant for alpha's output must not approve beta's.
    let late = call!(handle.actor, |reply| TaskMsg::SubmitDecision {
        decision: ReviewerDecision::Approve,
        reason: None,
        review_id: Some(first_review.clone()),
        reply,
    })
    .unwrap();
    assert!(matches!(late, Err(OrchestratorError::StaleDecision(_))));
    assert_eq!(handle.current().status, TaskStatus::PendingHuman);

    let ack = call!(handle.actor, |reply| TaskMsg::SubmitDecision {
        decision: ReviewerDecision::Approve,
        reason: None,
        review_id: second.pending_review_id.clone(),
        reply,
    })
    .unwrap();
    assert!(ack.is_ok());

    let snapshot = wait_terminal(&handle).await;
    assert_eq!(snapshot.status, TaskStatus::Complete);
    assert_eq!(snapshot.spent_to_date, 80);
}
