//! WebSocket route (§6): `subscribe_command` / `start_log_streaming` /
//! `stop_log_streaming` / `ping` in, `command_update` / `log_update` / `pong`
//! out.
//!
//! Grounded on the teacher's `websocket::handler`/`websocket::connection`
//! split (upgrade handler registers a connection and spawns a forwarding
//! task; an incoming-message loop drives behaviour), simplified to a flat
//! per-connection subscriber set since this crate has no per-user sessions.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    SubscribeCommand { command_name: String },
    StartLogStreaming { command_name: String, execution_id: i64 },
    StopLogStreaming { command_name: String },
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    CommandUpdate { command_name: String, data: serde_json::Value },
    LogUpdate { command_name: String, logs: Vec<String> },
    Pong,
}

struct Connection {
    sender: mpsc::UnboundedSender<ServerMessage>,
    subscribed_commands: Mutex<HashSet<String>>,
    log_streams: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Tracks every live WebSocket connection and which commands each one cares
/// about. `broadcast_command_update` is called by whatever drives command
/// status changes (the scheduler's dispatch loop, via `main`).
pub struct ConnectionRegistry {
    next_id: AtomicUsize,
    connections: RwLock<HashMap<usize, Arc<Connection>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self { next_id: AtomicUsize::new(1), connections: RwLock::new(HashMap::new()) }
    }

    fn register(&self) -> (usize, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection {
            sender: tx,
            subscribed_commands: Mutex::new(HashSet::new()),
            log_streams: Mutex::new(HashMap::new()),
        });
        self.connections.write().unwrap().insert(id, conn);
        (id, rx)
    }

    fn unregister(&self, id: usize) {
        if let Some(conn) = self.connections.write().unwrap().remove(&id) {
            for (_, handle) in conn.log_streams.lock().unwrap().drain() {
                handle.abort();
            }
        }
    }

    fn connection(&self, id: usize) -> Option<Arc<Connection>> {
        self.connections.read().unwrap().get(&id).cloned()
    }

    pub fn broadcast_command_update(&self, command_name: &str, data: serde_json::Value) {
        let msg = ServerMessage::CommandUpdate { command_name: command_name.to_string(), data };
        for conn in self.connections.read().unwrap().values() {
            if conn.subscribed_commands.lock().unwrap().contains(command_name) {
                let _ = conn.sender.send(msg.clone());
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, mut outgoing_rx) = state.connections.register();
    debug!(connection_id = id, "websocket connected");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else { continue };
            if ws_sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(Message::Text(text))) = ws_stream.next().await {
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => handle_client_message(id, msg, &state).await,
            Err(e) => debug!(connection_id = id, error = %e, "could not parse client message"),
        }
    }

    forward.abort();
    state.connections.unregister(id);
    debug!(connection_id = id, "websocket disconnected");
}

async fn handle_client_message(conn_id: usize, msg: ClientMessage, state: &AppState) {
    let Some(conn) = state.connections.connection(conn_id) else { return };

    match msg {
        ClientMessage::SubscribeCommand { command_name } => {
            conn.subscribed_commands.lock().unwrap().insert(command_name);
        }
        ClientMessage::Ping => {
            let _ = conn.sender.send(ServerMessage::Pong);
        }
        ClientMessage::StopLogStreaming { command_name } => {
            if let Some(handle) = conn.log_streams.lock().unwrap().remove(&command_name) {
                handle.abort();
            }
            state.log_fanout.unsubscribe_command(&command_name);
        }
        ClientMessage::StartLogStreaming { command_name, execution_id } => {
            state.log_fanout.start_streaming(&command_name, execution_id);
            let mut rx = state.log_fanout.subscribe(&command_name);
            let sender = conn.sender.clone();
            let name = command_name.clone();
            let handle = tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    if sender.send(ServerMessage::LogUpdate { command_name: name.clone(), logs: vec![line] }).is_err() {
                        break;
                    }
                }
            });
            if let Some(previous) = conn.log_streams.lock().unwrap().insert(command_name, handle) {
                previous.abort();
            }
        }
    }
}
