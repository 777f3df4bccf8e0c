//! WebSocket plumbing: wire message types, the observer broadcaster,
//! and the per-connection socket loop.
//!
//! Observers receive every dashboard message as a JSON text frame.
//! The same socket carries the three control frames back (confirm,
//! stop, restart); a control that fails is answered with an
//! error-level `log` frame on that connection only, never broadcast.

use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::dashboard::api::AppState;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::state::{FileStatus, LogLevel, StepStatus};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Wire message types ───────────────────────────────────────────────

/// Messages pushed to every dashboard observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardMessage {
    Log {
        message: String,
        level: LogLevel,
        timestamp: DateTime<Utc>,
    },
    StepUpdate {
        #[serde(rename = "stepId")]
        step_id: u32,
        status: StepStatus,
        details: String,
        message: String,
        data: Value,
    },
    AwaitingConfirmation {
        #[serde(rename = "stepId")]
        step_id: u32,
        message: String,
        data: Value,
    },
    FileModified {
        path: String,
        status: FileStatus,
        stats: String,
    },
    WorkflowError {
        title: String,
        message: String,
        details: String,
    },
    WorkflowComplete {
        message: String,
        summary: Value,
    },
}

/// Control frames sent by a dashboard client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    ConfirmStep,
    StopWorkflow,
    RestartStep {
        #[serde(rename = "stepId")]
        step_id: u32,
    },
}

// ── Broadcaster ──────────────────────────────────────────────────────

/// Fan-out of serialized dashboard messages to all live observers.
///
/// Messages are serialized once and sent to a broadcast channel; each
/// connection forwards from its own receiver. A receiver that lags
/// past the channel capacity skips the missed frames and continues.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<String>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Serialize and broadcast. Returns silently when no observer is
    /// connected.
    pub fn send(&self, msg: &DashboardMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize dashboard message");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    let rx = state.engine.broadcaster().subscribe();
    run_socket_loop(sender, receiver, rx, state.engine.clone()).await;
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, control-frame handling, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the
/// connection is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
    engine: Arc<WorkflowEngine>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Broadcast forwarding ────────────────────────────────
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Missed some frames; continue from the newest
                        continue;
                    }
                }
            }

            // ── Client frames (controls, pong, close) ───────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = apply_control(&engine, text.as_str())
                            && let Ok(json) = serde_json::to_string(&reply)
                            && sender.send(Message::Text(json.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ignore Binary and Ping frames from clients
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

/// Apply one inbound control frame. Returns the error reply for this
/// connection, if any; successful controls answer nothing, the
/// resulting state changes arrive as broadcasts.
fn apply_control(engine: &Arc<WorkflowEngine>, text: &str) -> Option<DashboardMessage> {
    let control: ControlMessage = match serde_json::from_str(text) {
        Ok(control) => control,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable control frame");
            return Some(error_reply(format!("Unrecognized control frame: {e}")));
        }
    };
    let result = match control {
        ControlMessage::ConfirmStep => {
            engine.confirm();
            Ok(())
        }
        ControlMessage::StopWorkflow => {
            engine.stop();
            Ok(())
        }
        ControlMessage::RestartStep { step_id } => engine.restart(step_id),
    };
    match result {
        Ok(()) => None,
        Err(err) => Some(error_reply(err.to_string())),
    }
}

fn error_reply(message: String) -> DashboardMessage {
    DashboardMessage::Log {
        message,
        level: LogLevel::Error,
        timestamp: Utc::now(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
