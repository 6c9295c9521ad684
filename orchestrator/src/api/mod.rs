//! HTTP API routes for the task orchestrator
//!
//! Thin handlers over [`AppState`]; every failure is returned as
//! `{ "error": TaskError }` with a status derived from the error kind.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use shared_types::{ErrorKind, ErrorResponse};

pub mod tasks;
pub mod websocket;

use crate::app_state::AppState;
use crate::error::OrchestratorError;

#[derive(Clone)]
pub struct ApiState {
    pub app_state: AppState,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/{task_id}", get(tasks::get_task_status))
        .route("/tasks/{task_id}/events", get(tasks::get_task_events))
        .route("/tasks/{task_id}/decision", post(tasks::submit_decision))
        .route("/tasks/{task_id}/cancel", post(tasks::cancel_task))
        .route("/tasks/{task_id}/payments", get(tasks::get_task_payments))
        .route("/ws/tasks/{task_id}", get(websocket::task_events_websocket))
}

/// Health check endpoint
pub async fn health_check(State(_state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "task-orchestrator",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Error wrapper that renders as an [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

pub fn status_code_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::StaleDecision => StatusCode::CONFLICT,
        ErrorKind::BudgetExceeded => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Negotiation
        | ErrorKind::Payment
        | ErrorKind::ExecutionPermanent
        | ErrorKind::Verification => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::GONE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0.to_task_error();
        let status = status_code_for(error.kind);
        if status.is_server_error() {
            tracing::error!(kind = ?error.kind, message = %error.message, "API request failed");
        } else {
            tracing::debug!(kind = ?error.kind, message = %error.message, "API request rejected");
        }
        (status, Json(ErrorResponse { error })).into_response()
    }
}
