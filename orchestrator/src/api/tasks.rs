//! Task endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use shared_types::{CreateTaskRequest, HumanDecisionRequest};

use crate::api::{ApiError, ApiState};

pub async fn create_task(
    State(state): State<ApiState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.app_state.create_task(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub async fn list_tasks(State(state): State<ApiState>) -> impl IntoResponse {
    let tasks = state.app_state.list_tasks().await;
    Json(json!({ "tasks": tasks }))
}

pub async fn get_task_status(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.app_state.task_status(&task_id).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since_seq: u64,
}

/// Raw progress events after `since_seq`, for clients that poll.
pub async fn get_task_events(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state.app_state.events_since(&task_id, query.since_seq).await?;
    Ok(Json(json!({ "task_id": task_id, "events": events })))
}

pub async fn submit_decision(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    Json(decision): Json<HumanDecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ack = state.app_state.submit_decision(&task_id, decision).await?;
    Ok(Json(ack))
}

pub async fn cancel_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ack = state.app_state.cancel_task(&task_id).await?;
    let status = if ack.accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ack)))
}

/// Escrow audit trail for a task.
pub async fn get_task_payments(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let escrows = state.app_state.payments_for(&task_id).await?;
    let payments = state.app_state.payments();
    Ok(Json(json!({
        "task_id": task_id,
        "escrows": escrows,
        "committed_total": payments.committed_total(&task_id),
        "released_total": payments.released_total(&task_id),
        "budget_remaining": payments.budget_remaining(&task_id),
    })))
}
