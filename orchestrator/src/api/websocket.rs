//! WebSocket push of one task's progress events.
//!
//! On connect the client receives every event so far, then each new event
//! as it is appended. The stream ends after the task reaches a terminal
//! state. A client that falls behind the live feed has the gap refilled
//! from the log, so no event is skipped.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use shared_types::{ProgressEvent, PROGRESS_CANCELLED, PROGRESS_COMPLETED, PROGRESS_FAILED, STEP_ORCHESTRATOR};
use tokio::sync::{broadcast, mpsc};

use crate::api::{ApiError, ApiState};
use crate::app_state::AppState;

pub async fn task_events_websocket(
    ws: WebSocketUpgrade,
    Path(task_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let (backlog, live) = state.app_state.subscribe(&task_id).await?;
    let app_state = state.app_state.clone();
    Ok(ws.on_upgrade(move |socket| handle_task_socket(socket, app_state, task_id, backlog, live)))
}

fn event_message(event: &ProgressEvent) -> Message {
    Message::Text(
        json!({
            "type": "event",
            "event": event,
        })
        .to_string()
        .into(),
    )
}

fn is_final(event: &ProgressEvent) -> bool {
    event.step == STEP_ORCHESTRATOR
        && matches!(
            event.status.as_str(),
            PROGRESS_COMPLETED | PROGRESS_FAILED | PROGRESS_CANCELLED
        )
}

async fn handle_task_socket(
    socket: WebSocket,
    app_state: AppState,
    task_id: String,
    backlog: Vec<ProgressEvent>,
    mut live: broadcast::Receiver<ProgressEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(Message::Text(
        json!({ "type": "connected", "task_id": task_id })
            .to_string()
            .into(),
    ));

    let mut last_seq = 0;
    let mut finished = false;
    for event in &backlog {
        last_seq = event.seq;
        finished |= is_final(event);
        let _ = tx.send(event_message(event));
    }

    while !finished {
        tokio::select! {
            maybe_msg = receiver.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({}));
                        if parsed.get("type").and_then(|v| v.as_str()) == Some("ping") {
                            let _ = tx.send(Message::Text(json!({"type":"pong"}).to_string().into()));
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(task_id = %task_id, error = %e, "task websocket receive error");
                        break;
                    }
                }
            }
            received = live.recv() => {
                match received {
                    Ok(event) if event.task_id == task_id && event.seq > last_seq => {
                        last_seq = event.seq;
                        finished = is_final(&event);
                        let _ = tx.send(event_message(&event));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(task_id = %task_id, skipped, "task websocket lagged");
                        let _ = tx.send(Message::Text(
                            json!({ "type": "lagged", "skipped": skipped, "last_seq": last_seq })
                                .to_string()
                                .into(),
                        ));
                        match app_state.events_since(&task_id, last_seq).await {
                            Ok(missed) => {
                                for event in &missed {
                                    last_seq = event.seq;
                                    finished |= is_final(event);
                                    let _ = tx.send(event_message(event));
                                }
                            }
                            Err(e) => {
                                tracing::warn!(task_id = %task_id, error = %e, "task websocket gap refill failed");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    let _ = tx.send(Message::Close(None));
    drop(tx);
    let _ = writer.await;
}
