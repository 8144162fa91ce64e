//! Realtime channel: rooms, hub, and the WebSocket endpoint
//!
//! Connections authenticate with the same session cookie as HTTP (the
//! upgrade route sits behind the session middleware). Each connection is
//! implicitly in its user's room `user-<id>`; joining `gap-<id>` re-runs
//! the gap read predicate and answers an `error` event on failure.
//!
//! The stream is fire-and-forget: a send to a gone or slow connection is
//! dropped, and clients refetch on reconnect.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Extension;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::rbac;
use crate::auth::CurrentUser;
use crate::state::AppState;

/// Room naming helpers; rooms are plain strings on the wire
pub fn gap_room(gap_id: i64) -> String {
    format!("gap-{gap_id}")
}

pub fn user_room(user_id: i64) -> String {
    format!("user-{user_id}")
}

/// Server→client message envelope
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    pub event: String,
    pub data: Value,
}

impl ServerMessage {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    fn error(message: &str) -> Self {
        Self::new("error", serde_json::json!({ "message": message }))
    }
}

/// Client→server messages: room management only
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum ClientMessage {
    JoinGap {
        #[serde(rename = "gapId")]
        gap_id: i64,
    },
    LeaveGap {
        #[serde(rename = "gapId")]
        gap_id: i64,
    },
}

struct Connection {
    user_id: i64,
    rooms: HashSet<String>,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<u64, Connection>,
    next_id: u64,
}

/// Process-wide singleton holding every live connection
#[derive(Clone, Default)]
pub struct RealtimeHub {
    inner: Arc<Mutex<HubInner>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; it starts out in its user room.
    fn register(&self, user_id: i64) -> (u64, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;

        let mut rooms = HashSet::new();
        rooms.insert(user_room(user_id));

        inner.connections.insert(
            id,
            Connection {
                user_id,
                rooms,
                tx,
            },
        );
        debug!(connection = id, user = user_id, "realtime connection registered");
        (id, rx)
    }

    fn unregister(&self, connection_id: u64) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        inner.connections.remove(&connection_id);
        debug!(connection = connection_id, "realtime connection removed");
    }

    fn join_room(&self, connection_id: u64, room: String) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let Some(conn) = inner.connections.get_mut(&connection_id) {
            conn.rooms.insert(room);
        }
    }

    fn leave_room(&self, connection_id: u64, room: &str) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let Some(conn) = inner.connections.get_mut(&connection_id) {
            conn.rooms.remove(room);
        }
    }

    /// Deliver to every connection in the room. Sends to closed
    /// connections are dropped silently.
    pub fn broadcast(&self, room: &str, message: ServerMessage) {
        let inner = self.inner.lock().expect("hub lock poisoned");
        for conn in inner.connections.values() {
            if conn.rooms.contains(room) {
                let _ = conn.tx.send(message.clone());
            }
        }
    }

    /// Number of connections currently in a room (test and diagnostics)
    pub fn room_size(&self, room: &str) -> usize {
        let inner = self.inner.lock().expect("hub lock poisoned");
        inner
            .connections
            .values()
            .filter(|c| c.rooms.contains(room))
            .count()
    }

    /// Drop every connection; part of ordered teardown.
    pub fn close_all(&self) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let count = inner.connections.len();
        inner.connections.clear();
        if count > 0 {
            info!(connections = count, "realtime hub closed");
        }
    }
}

// ============================================================================
// WebSocket endpoint
// ============================================================================

/// GET /api/ws — upgrade sharing the HTTP session
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> impl IntoResponse {
    let user_id = current.user().id;
    ws.on_upgrade(move |socket| handle_socket(socket, state, current, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, current: CurrentUser, user_id: i64) {
    let (connection_id, mut rx) = state.hub.register(user_id);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                let Ok(text) = serde_json::to_string(&message) else { continue };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, &current, connection_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(connection = connection_id, error = %err, "socket error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister(connection_id);
}

async fn handle_client_message(
    state: &AppState,
    current: &CurrentUser,
    connection_id: u64,
    text: &str,
) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let Ok(message) = parsed else {
        warn!(connection = connection_id, "unparseable client message");
        return;
    };

    match message {
        ClientMessage::JoinGap { gap_id } => {
            // Joining re-applies the same read predicate as HTTP.
            let allowed = match state.gaps().find(gap_id).await {
                Ok(Some(gap)) => {
                    rbac::ensure_can_read_gap(current.user(), &gap, &state.pocs())
                        .await
                        .is_ok()
                }
                _ => false,
            };

            if allowed {
                state.hub.join_room(connection_id, gap_room(gap_id));
                debug!(connection = connection_id, gap = gap_id, "joined gap room");
            } else {
                let denial = ServerMessage::error("you do not have access to this gap");
                let inner = state.hub.inner.lock().expect("hub lock poisoned");
                if let Some(conn) = inner.connections.get(&connection_id) {
                    let _ = conn.tx.send(denial);
                }
            }
        }
        ClientMessage::LeaveGap { gap_id } => {
            state.hub.leave_room(connection_id, &gap_room(gap_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_names() {
        assert_eq!(gap_room(42), "gap-42");
        assert_eq!(user_room(7), "user-7");
    }

    #[test]
    fn test_register_joins_user_room() {
        let hub = RealtimeHub::new();
        let (_id, _rx) = hub.register(7);
        assert_eq!(hub.room_size(&user_room(7)), 1);
        assert_eq!(hub.room_size(&gap_room(1)), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_room_members_only() {
        let hub = RealtimeHub::new();
        let (id_a, mut rx_a) = hub.register(1);
        let (_id_b, mut rx_b) = hub.register(2);

        hub.join_room(id_a, gap_room(5));
        hub.broadcast(&gap_room(5), ServerMessage::new("gap:updated", Value::Null));

        assert_eq!(rx_a.try_recv().unwrap().event, "gap:updated");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_room_stops_delivery() {
        let hub = RealtimeHub::new();
        let (id, mut rx) = hub.register(1);

        hub.join_room(id, gap_room(9));
        hub.leave_room(id, &gap_room(9));
        hub.broadcast(&gap_room(9), ServerMessage::new("new-comment", Value::Null));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unregister_clears_membership() {
        let hub = RealtimeHub::new();
        let (id, _rx) = hub.register(1);
        hub.unregister(id);
        assert_eq!(hub.room_size(&user_room(1)), 0);
    }

    #[test]
    fn test_broadcast_to_gone_connection_is_dropped() {
        let hub = RealtimeHub::new();
        let (id, rx) = hub.register(1);
        hub.join_room(id, gap_room(3));
        drop(rx);
        // No panic; the send failure is swallowed.
        hub.broadcast(&gap_room(3), ServerMessage::new("gap:updated", Value::Null));
    }

    #[test]
    fn test_client_message_wire_format() {
        let join: ClientMessage =
            serde_json::from_str(r#"{"event":"join-gap","gapId":12}"#).unwrap();
        assert!(matches!(join, ClientMessage::JoinGap { gap_id: 12 }));

        let leave: ClientMessage =
            serde_json::from_str(r#"{"event":"leave-gap","gapId":12}"#).unwrap();
        assert!(matches!(leave, ClientMessage::LeaveGap { gap_id: 12 }));
    }
}
