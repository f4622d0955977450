use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::access;
use super::api::{Actor, SharedState};
use super::db::DbHandle;
use super::models::*;
use crate::errors::EngineResult;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

/// Board events pushed to connected clients after the change commits.
/// `project_id` is the project the entity lives in once the change is done.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    CardCreated {
        project_id: String,
        card: Card,
    },
    CardDeleted {
        project_id: String,
        card_id: String,
        column_id: String,
    },
    CardMoved {
        project_id: String,
        card: Card,
        from_column_id: String,
    },
    ColumnsReordered {
        project_id: String,
        board_id: String,
        column_ids: Vec<String>,
    },
    CardTransferred {
        project_id: String,
        card: Card,
        from_board_id: String,
        from_project_id: String,
    },
    CardCloned {
        project_id: String,
        card: Card,
        source_card_id: String,
    },
    BoardMoved {
        project_id: String,
        board: Board,
        from_project_id: String,
    },
    OwnershipTransferred {
        project_id: String,
        new_owner_id: String,
    },
}

impl WsMessage {
    /// Projects whose members should see this event.
    pub fn project_ids(&self) -> Vec<String> {
        match self {
            Self::CardTransferred {
                project_id,
                from_project_id,
                ..
            }
            | Self::BoardMoved {
                project_id,
                from_project_id,
                ..
            } => {
                let mut ids = vec![project_id.clone()];
                if from_project_id != project_id {
                    ids.push(from_project_id.clone());
                }
                ids
            }
            Self::CardCreated { project_id, .. }
            | Self::CardDeleted { project_id, .. }
            | Self::CardMoved { project_id, .. }
            | Self::ColumnsReordered { project_id, .. }
            | Self::CardCloned { project_id, .. }
            | Self::OwnershipTransferred { project_id, .. } => vec![project_id.clone()],
        }
    }
}

/// A serialized event plus the projects it concerns.
#[derive(Debug, Clone)]
pub struct BoardEvent {
    pub project_ids: Vec<String>,
    pub json: String,
}

/// Whether `user_id` can reach at least one project the event concerns.
pub fn visible_to(conn: &Connection, user_id: &str, event: &BoardEvent) -> EngineResult<bool> {
    for project_id in &event.project_ids {
        if access::has_project_access(conn, user_id, project_id)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// ── WebSocket handler ────────────────────────────────────────────────

/// Upgrade an authenticated caller. Missing identity is rejected with 401
/// before the handshake.
pub async fn ws_handler(
    State(state): State<SharedState>,
    actor: Actor,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let subscriber = Subscriber {
        user_id: actor.user_id,
        db: state.db.clone(),
    };
    let tx = state.ws_tx.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, tx, subscriber))
}

/// The connected user; access is re-checked per event so grants and
/// revocations made while connected take effect.
struct Subscriber {
    user_id: String,
    db: DbHandle,
}

impl Subscriber {
    async fn can_see(&self, event: &BoardEvent) -> bool {
        let user_id = self.user_id.clone();
        let event = event.clone();
        match self
            .db
            .call(move |db| visible_to(db.conn(), &user_id, &event))
            .await
        {
            Ok(visible) => visible,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "websocket access check failed");
                false
            }
        }
    }
}

async fn handle_socket(socket: WebSocket, tx: broadcast::Sender<BoardEvent>, subscriber: Subscriber) {
    let (sender, receiver) = socket.split();
    let rx = tx.subscribe();
    tracing::debug!(user_id = %subscriber.user_id, "websocket client connected");
    run_socket_loop(sender, receiver, rx, &subscriber).await;
    tracing::debug!(user_id = %subscriber.user_id, "websocket client disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits. Events for projects the
/// subscriber cannot reach are dropped.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<BoardEvent>,
    subscriber: &Subscriber,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !subscriber.can_see(&event).await {
                            continue;
                        }
                        if sender.send(Message::Text(event.json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagged; events dropped");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<BoardEvent>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(BoardEvent {
                project_ids: msg.project_ids(),
                json,
            });
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize websocket message");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
