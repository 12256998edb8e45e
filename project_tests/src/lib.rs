//! # Mock MES Backend
//!
//! An in-process stand-in for the backend the dashboards talk to, used by the
//! integration tests in `tests/`.
//!
//! - **REST**: every path under `/api/` answers with whatever JSON (and
//!   status) a test put there with [`MockBackend::set_json`]. Hits and request
//!   bodies are recorded.
//! - **Rooms**: `/ws` speaks the room protocol. A `join` is acknowledged,
//!   rejected or ignored depending on how the test configured the room; events
//!   published with [`MockBackend::emit`] reach every socket joined to the
//!   target room.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use lib_shopfloor::rooms::wire::{ClientFrame, ServerFrame};

/// A request the REST side received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// HTTP verb.
    pub method: String,
    /// Path and query below `/api/`.
    pub path: String,
    /// Decoded JSON body, if any.
    pub body: Option<Value>,
}

/// Control messages fanned out to every socket task.
#[derive(Debug, Clone)]
enum Control {
    Event {
        deliver_to: String,
        tag: Option<String>,
        event: String,
        payload: Value,
    },
    DropAll,
}

#[derive(Default)]
struct Rooms {
    rejected: HashMap<String, String>,
    silent: HashSet<String>,
    joins: Vec<String>,
    leaves: Vec<String>,
}

struct MockState {
    routes: Mutex<HashMap<String, (StatusCode, Value)>>,
    hits: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<RecordedRequest>>,
    rooms: Mutex<Rooms>,
    control: broadcast::Sender<Control>,
    connections: AtomicUsize,
}

/// A running mock backend. Stops when dropped.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl MockBackend {
    /// Binds to an ephemeral localhost port and starts serving.
    pub async fn start() -> std::io::Result<Self> {
        let (control, _) = broadcast::channel(256);
        let state = Arc::new(MockState {
            routes: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            rooms: Mutex::new(Rooms::default()),
            control,
            connections: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .fallback(rest_handler)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = served {
                log::warn!("Mock backend stopped with error: {}", e);
            }
        });
        log::info!("Mock backend listening on {}", addr);

        Ok(Self { addr, state, shutdown })
    }

    /// Base URL for `ApiClient`.
    pub fn api_url(&self) -> String {
        format!("http://{}/api/", self.addr)
    }

    /// Endpoint for `RoomClient`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Serves `body` with 200 at `path` (path and query below `/api/`).
    pub fn set_json(&self, path: &str, body: Value) {
        self.set_response(path, StatusCode::OK, body);
    }

    /// Serves `body` with `status` at `path`.
    pub fn set_response(&self, path: &str, status: StatusCode, body: Value) {
        lock(&self.state.routes).insert(path.to_string(), (status, body));
    }

    /// How often `path` was requested.
    pub fn hits(&self, path: &str) -> usize {
        lock(&self.state.hits).get(path).copied().unwrap_or(0)
    }

    /// Every REST request so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.requests).clone()
    }

    /// Answers joins of `room` with a rejection.
    pub fn reject_room(&self, room: &str, reason: &str) {
        lock(&self.state.rooms).rejected.insert(room.to_string(), reason.to_string());
    }

    /// Never answers joins of `room`.
    pub fn ignore_joins(&self, room: &str) {
        lock(&self.state.rooms).silent.insert(room.to_string());
    }

    /// Rooms joined so far, in order (repeats on reconnect).
    pub fn joins(&self) -> Vec<String> {
        lock(&self.state.rooms).joins.clone()
    }

    /// Rooms left so far.
    pub fn leaves(&self) -> Vec<String> {
        lock(&self.state.rooms).leaves.clone()
    }

    /// Open socket count.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Broadcasts `event` to sockets joined to `room`, tagged with `room`.
    pub fn emit(&self, room: &str, event: &str, payload: Value) {
        self.send(Control::Event {
            deliver_to: room.to_string(),
            tag: Some(room.to_string()),
            event: event.to_string(),
            payload,
        });
    }

    /// Broadcasts `event` to sockets joined to `room` with an arbitrary tag.
    pub fn emit_tagged(&self, room: &str, tag: Option<&str>, event: &str, payload: Value) {
        self.send(Control::Event {
            deliver_to: room.to_string(),
            tag: tag.map(str::to_string),
            event: event.to_string(),
            payload,
        });
    }

    /// Closes every open socket from the server side.
    pub fn drop_connections(&self) {
        self.send(Control::DropAll);
    }

    /// Polls until `n` joins have been seen or `timeout` elapses.
    pub async fn wait_for_joins(&self, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || lock(&self.state.rooms).joins.len() >= n).await
    }

    /// Polls until `n` leaves have been seen or `timeout` elapses.
    pub async fn wait_for_leaves(&self, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || lock(&self.state.rooms).leaves.len() >= n).await
    }

    /// Polls until `path` was hit `n` times or `timeout` elapses.
    pub async fn wait_for_hits(&self, path: &str, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.hits(path) >= n).await
    }

    async fn wait_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        done()
    }

    fn send(&self, control: Control) {
        // No receivers simply means no sockets are open
        let _ = self.state.control.send(control);
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.send(Control::DropAll);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Serves the configured JSON for any `/api/...` path.
async fn rest_handler(State(state): State<Arc<MockState>>, method: Method, uri: Uri, body: Bytes) -> Response {
    let full = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let Some(path) = full.strip_prefix("/api/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let path = path.to_string();

    *lock(&state.hits).entry(path.clone()).or_insert(0) += 1;
    lock(&state.requests).push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        body: serde_json::from_slice(&body).ok(),
    });

    let route = lock(&state.routes).get(&path).cloned();
    match route {
        Some((status, value)) => (status, axum::Json(value)).into_response(),
        None => (StatusCode::NOT_FOUND, axum::Json(serde_json::json!({"error": "no such route"}))).into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One room session: handshake, then forward matching events until either
/// side closes.
async fn handle_socket(socket: WebSocket, state: Arc<MockState>) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut tx, mut rx) = socket.split();
    let mut control = state.control.subscribe();
    let mut joined: Option<String> = None;

    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                        Ok(ClientFrame::Join { room, .. }) => {
                            let mut rooms = lock(&state.rooms);
                            rooms.joins.push(room.clone());
                            if let Some(reason) = rooms.rejected.get(&room) {
                                Some(ServerFrame::Rejected { room, reason: reason.clone() })
                            } else if rooms.silent.contains(&room) {
                                None
                            } else {
                                joined = Some(room.clone());
                                Some(ServerFrame::Joined { room })
                            }
                        }
                        Ok(ClientFrame::Leave { room }) => {
                            lock(&state.rooms).leaves.push(room);
                            joined = None;
                            None
                        }
                        Err(e) => Some(ServerFrame::Error { message: e.to_string() }),
                    };
                    if let Some(frame) = reply {
                        if tx.send(Message::Text(frame.to_text().into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            ctl = control.recv() => match ctl {
                Ok(Control::Event { deliver_to, tag, event, payload }) => {
                    if joined.as_deref() != Some(deliver_to.as_str()) {
                        continue;
                    }
                    let frame = ServerFrame::Event { room: tag, event, payload };
                    if tx.send(Message::Text(frame.to_text().into())).await.is_err() {
                        break;
                    }
                }
                Ok(Control::DropAll) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = tx.close().await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => log::warn!("Mock socket lagged by {} messages", n),
            },
        }
    }

    state.connections.fetch_sub(1, Ordering::SeqCst);
}
