// crates/server/src/routes/logs.rs
//! WebSocket endpoint streaming a job's log.
//!
//! - WS /api/jobs/{id}/logs
//!
//! Protocol (server -> client, JSON text frames):
//! - `{"type":"line","stream":"stdout","data":"..."}` for every recorded line,
//!   backlog first, then live lines in order
//! - `{"type":"done","status":"completed","returncode":0}` exactly once, after
//!   which the server closes the socket
//! - `{"type":"error","message":"..."}` before closing on failure
//!
//! Client -> server: `{"type":"ping"}` is answered with `{"type":"pong"}`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use bidsify_core::{JobId, JobStatus, LogStream};
use serde::{Deserialize, Serialize};

use crate::jobs::{LogBroadcaster, LogEvent, LogSubscription};
use crate::state::AppState;

/// Frames sent to log observers.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogFrame<'a> {
    Line {
        stream: LogStream,
        data: &'a str,
    },
    Done {
        status: JobStatus,
        returncode: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    },
    Error {
        message: String,
    },
}

impl LogFrame<'_> {
    fn into_message(self) -> Message {
        let json = serde_json::to_string(&self).unwrap_or_default();
        Message::Text(json.into())
    }
}

/// Longest a single frame may wait on a client that stopped reading.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Await one send, bounded by `limit`. `false` means the peer is gone or stuck.
async fn send_within<F>(send: F, limit: Duration) -> bool
where
    F: Future<Output = Result<(), axum::Error>>,
{
    matches!(tokio::time::timeout(limit, send).await, Ok(Ok(())))
}

/// Incoming client message.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    msg_type: String,
}

/// RAII guard that detaches the observer however the handler exits.
struct SubscriptionGuard {
    broadcaster: LogBroadcaster,
    subscription: LogSubscription,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.subscription);
        tracing::debug!(
            job_id = %self.subscription.job_id(),
            subscriber = self.subscription.id(),
            "Log WebSocket closed"
        );
    }
}

async fn close_with_error(mut socket: WebSocket, message: String, code: u16, reason: &'static str) {
    if !send_within(socket.send(LogFrame::Error { message }.into_message()), SEND_TIMEOUT).await {
        return;
    }
    let close = Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }));
    send_within(socket.send(close), SEND_TIMEOUT).await;
}

/// WS /api/jobs/{id}/logs
///
/// Subscription happens INSIDE the on_upgrade callback: if the client drops
/// during the HTTP handshake the callback never runs and no observer is left
/// registered.
async fn ws_job_logs(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let job_id = JobId::from(job_id);

    if state.registry.entry(&job_id).is_err() {
        return ws.on_upgrade(move |socket| async move {
            close_with_error(socket, format!("Job '{job_id}' not found"), 4004, "Job not found")
                .await;
        });
    }

    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| async move {
        match broadcaster.subscribe(&job_id) {
            Ok(subscription) => {
                let guard = SubscriptionGuard {
                    broadcaster,
                    subscription,
                };
                stream_logs(socket, guard).await;
            }
            Err(e) => {
                close_with_error(socket, e.to_string(), 4004, "Job not found").await;
            }
        }
    })
}

async fn stream_logs(mut socket: WebSocket, mut guard: SubscriptionGuard) {
    let job_id = guard.subscription.job_id().clone();
    tracing::debug!(job_id = %job_id, "Log WebSocket attached");

    let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(15));
    // Skip the first immediate tick
    heartbeat_interval.tick().await;

    loop {
        tokio::select! {
            event = guard.subscription.recv() => {
                match event {
                    Some(LogEvent::Line(record)) => {
                        let frame = LogFrame::Line { stream: record.stream, data: &record.line };
                        if !send_within(socket.send(frame.into_message()), SEND_TIMEOUT).await {
                            tracing::debug!(job_id = %job_id, "Client disconnected or stalled during log stream");
                            return;
                        }
                    }
                    Some(LogEvent::Done(outcome)) => {
                        let frame = LogFrame::Done {
                            status: outcome.status,
                            returncode: outcome.returncode,
                            error: outcome.error.as_deref(),
                        };
                        if send_within(socket.send(frame.into_message()), SEND_TIMEOUT).await {
                            let close = Message::Close(Some(CloseFrame {
                                code: 1000,
                                reason: "Job finished".into(),
                            }));
                            send_within(socket.send(close), SEND_TIMEOUT).await;
                        }
                        return;
                    }
                    None => {
                        // The broadcaster dropped us for falling behind.
                        tracing::info!(job_id = %job_id, "Log observer dropped, closing socket");
                        close_with_error(
                            socket,
                            "Log stream fell behind; reconnect to resume from the backlog".to_string(),
                            4008,
                            "Observer too slow",
                        )
                        .await;
                        return;
                    }
                }
            }

            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(msg) = serde_json::from_str::<ClientMessage>(&text) {
                            if msg.msg_type == "ping" {
                                let pong = serde_json::json!({ "type": "pong" });
                                let pong = Message::Text(pong.to_string().into());
                                if !send_within(socket.send(pong), SEND_TIMEOUT).await {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(job_id = %job_id, "Client closed log stream");
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(job_id = %job_id, error = %e, "Log WebSocket error");
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = heartbeat_interval.tick() => {
                if !send_within(socket.send(Message::Ping(vec![].into())), SEND_TIMEOUT).await {
                    tracing::debug!(job_id = %job_id, "Heartbeat failed, client gone");
                    return;
                }
            }
        }
    }
}

/// Build the log streaming router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs/{id}/logs", get(ws_job_logs))
}
