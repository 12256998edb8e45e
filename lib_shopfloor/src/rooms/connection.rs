//! # Room Connection
//!
//! `RoomClient::open(room)` spawns one socket task per room and returns a
//! `ConnectionHandle` immediately. The task dials the WebSocket endpoint,
//! performs the join handshake and then feeds every `event` frame into the
//! handle's [`EventHub`], where pages subscribe by event name.
//!
//! ## Status
//! The handle publishes `Connecting`, `Connected`, `Error(..)` and `Closed`
//! through a `watch` channel. A transport failure never touches page data:
//! pages keep working and can still be refreshed by hand.
//!
//! ## Reconnects
//! What happens after a drop is a [`ReconnectPolicy`]. The default is `Never`:
//! the status stays `Error` and the caller decides whether to open again.
//! `Fixed` reproduces the fixed five-second retry some pages used; `Backoff`
//! doubles the delay per attempt up to a ceiling. A rejected join is never
//! retried.
//!
//! ## Room tags
//! Events are routed by name. If an envelope names a different room than the
//! one joined, it is still delivered unless `strict_room_filter` is set; the
//! mismatch is logged either way.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::TransportError;
use crate::rooms::hub::{EventHub, Subscription};
use crate::rooms::notification::Notification;
use crate::rooms::room::Room;
use crate::rooms::wire::{ClientFrame, ServerFrame};
use crate::utils::{client_id, lock_unpoisoned};

/// How long `close()` waits for the socket task to say goodbye.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Observable state of a room connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Dialling or waiting for the join acknowledgement.
    Connecting,
    /// Joined; events flow.
    Connected,
    /// The last attempt failed. Pages run in manual-refresh mode.
    Error(TransportError),
    /// `close()` was called.
    Closed,
}

impl ConnectionStatus {
    /// True while events can arrive.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// The transport error, if the status is `Error`.
    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// What the socket task does after losing the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Stay in `Error`; the caller re-opens.
    #[default]
    Never,
    /// Retry after the same delay every time.
    Fixed(Duration),
    /// Retry after `base * 2^attempt`, capped at `max`.
    Backoff {
        /// First delay.
        base: Duration,
        /// Ceiling.
        max: Duration,
    },
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` to give up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Fixed(delay) => Some(*delay),
            Self::Backoff { base, max } => {
                let factor = 2u32.saturating_pow(attempt.min(31));
                Some(base.saturating_mul(factor).min(*max))
            }
        }
    }
}

/// Tunables for [`RoomClient`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// How long to wait for `joined` after sending `join`.
    pub join_timeout: Duration,
    /// Behaviour after a drop.
    pub reconnect: ReconnectPolicy,
    /// Drop events whose envelope names another room.
    pub strict_room_filter: bool,
    /// Sent with the join frame.
    pub client_id: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::Never,
            strict_room_filter: false,
            client_id: client_id(),
        }
    }
}

/// Opens room connections against one WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct RoomClient {
    url: Url,
    options: ConnectionOptions,
}

impl RoomClient {
    /// Validates `ws_url` (`ws://` or `wss://`).
    pub fn new(ws_url: &str, options: ConnectionOptions) -> Result<Self, TransportError> {
        let url = Url::parse(ws_url).map_err(|e| TransportError::InvalidUrl {
            url: ws_url.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl {
                url: ws_url.to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(Self { url, options })
    }

    /// The endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Starts connecting to `room` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self, room: Room) -> ConnectionHandle {
        let hub = EventHub::new();
        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);
        let status_tx = Arc::new(status_tx);
        let cancel = CancellationToken::new();

        let task = SocketTask {
            url: self.url.clone(),
            room: room.clone(),
            options: self.options.clone(),
            hub: Arc::clone(&hub),
            status: Arc::clone(&status_tx),
            cancel: cancel.clone(),
        };
        log::info!("Opening {} on {}", room, self.url);
        let join = tokio::spawn(task.run());

        ConnectionHandle {
            inner: Arc::new(HandleInner {
                room,
                hub,
                status: status_tx,
                cancel,
                task: Mutex::new(Some(join)),
            }),
        }
    }
}

struct HandleInner {
    room: Room,
    hub: Arc<EventHub>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        // Last handle gone: stop the socket task and cut delivery
        self.cancel.cancel();
        self.hub.close();
    }
}

/// Cheaply cloneable handle to one joined room.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("room", &self.inner.room)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl ConnectionHandle {
    /// A connected handle without a socket, plus the feed that emits into it.
    ///
    /// Used for offline pages and tests.
    pub fn loopback(room: Room) -> (Self, LoopbackFeed) {
        let hub = EventHub::new();
        let (status_tx, _) = watch::channel(ConnectionStatus::Connected);
        let handle = Self {
            inner: Arc::new(HandleInner {
                room: room.clone(),
                hub: Arc::clone(&hub),
                status: Arc::new(status_tx),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        };
        let feed = LoopbackFeed {
            room,
            hub,
            status: Arc::clone(&handle.inner.status),
        };
        (handle, feed)
    }

    /// The joined room.
    pub fn room(&self) -> &Room {
        &self.inner.room
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver that changes with every status transition.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Listens to `events` in this room.
    pub fn subscribe(&self, events: &[&str]) -> Subscription {
        self.inner.hub.subscribe(events)
    }

    /// The hub events are dispatched into.
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.inner.hub
    }

    /// True after `close()`.
    pub fn is_closed(&self) -> bool {
        !self.inner.hub.is_open()
    }

    /// Leaves the room and stops the socket task.
    ///
    /// Delivery stops before the task is awaited: once this returns no
    /// subscriber of this handle will see another event.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.hub.close();

        let task = lock_unpoisoned(&self.inner.task).take();
        if let Some(mut task) = task {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                log::warn!("Socket task for {} did not stop in time; aborting", self.inner.room);
                task.abort();
            }
        }
        self.inner.status.send_replace(ConnectionStatus::Closed);
        log::info!("Closed {}", self.inner.room);
    }
}

/// Emits events into a loopback handle.
pub struct LoopbackFeed {
    room: Room,
    hub: Arc<EventHub>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl LoopbackFeed {
    /// Dispatches `event` with `payload`; returns the number of receivers.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.hub.dispatch(Notification {
            room: Some(self.room.to_string()),
            event: event.to_string(),
            payload,
        })
    }

    /// Overrides the handle's status (e.g. to simulate a drop).
    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }
}

/// Everything the background task needs; owned by the task.
struct SocketTask {
    url: Url,
    room: Room,
    options: ConnectionOptions,
    hub: Arc<EventHub>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    cancel: CancellationToken,
}

impl SocketTask {
    /// Connect / serve / reconnect loop.
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            self.status.send_replace(ConnectionStatus::Connecting);
            let mut joined = false;

            match self.serve(&mut joined).await {
                Ok(()) => break,
                Err(e) => {
                    log::warn!("Room {}: {}", self.room, e);
                    let rejected = matches!(e, TransportError::JoinRejected { .. });
                    self.status.send_replace(ConnectionStatus::Error(e));
                    if rejected {
                        return;
                    }
                    if joined {
                        attempt = 0;
                    }
                    let Some(delay) = self.options.reconnect.delay(attempt) else {
                        return;
                    };
                    attempt = attempt.saturating_add(1);
                    log::info!("Reconnecting to {} in {:?} (attempt {})", self.room, delay, attempt);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        self.status.send_replace(ConnectionStatus::Closed);
    }

    /// One connection lifetime. `Ok(())` means we were cancelled.
    async fn serve(&self, joined: &mut bool) -> Result<(), TransportError> {
        // --- Phase 1: Dial ---
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            result = connect_async(self.url.as_str()) => result,
        };
        let (ws_stream, _) = connected.map_err(|e| TransportError::Connect {
            url: self.url.to_string(),
            message: e.to_string(),
        })?;
        let (mut write, mut read) = ws_stream.split();

        // --- Phase 2: Join handshake ---
        let join = ClientFrame::Join {
            room: self.room.to_string(),
            client_id: self.options.client_id.clone(),
        };
        write
            .send(Message::Text(join.to_text().into()))
            .await
            .map_err(|e| TransportError::Disconnected(e.to_string()))?;

        let deadline = tokio::time::sleep(self.options.join_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.close().await;
                    return Ok(());
                }
                _ = &mut deadline => {
                    let _ = write.close().await;
                    return Err(TransportError::JoinTimeout {
                        room: self.room.to_string(),
                        timeout: self.options.join_timeout,
                    });
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match ServerFrame::parse(text.as_str()) {
                        Some(ServerFrame::Joined { room }) if room == self.room.as_str() => break,
                        Some(ServerFrame::Rejected { room, reason }) => {
                            return Err(TransportError::JoinRejected { room, reason });
                        }
                        Some(ServerFrame::Error { message }) => return Err(TransportError::Protocol(message)),
                        other => log::debug!("Ignoring frame before join of {}: {:?}", self.room, other),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(TransportError::Disconnected("closed before join".to_string()));
                    }
                    Some(Err(e)) => return Err(TransportError::Disconnected(e.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        }

        *joined = true;
        self.status.send_replace(ConnectionStatus::Connected);
        log::info!("Joined {}", self.room);

        // --- Phase 3: Serve events ---
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let leave = ClientFrame::Leave { room: self.room.to_string() };
                    let _ = write.send(Message::Text(leave.to_text().into())).await;
                    let _ = write.close().await;
                    return Ok(());
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(TransportError::Disconnected("closed by server".to_string()));
                    }
                    Some(Err(e)) => return Err(TransportError::Disconnected(e.to_string())),
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match ServerFrame::parse(text) {
            Some(ServerFrame::Event { room, event, payload }) => {
                if let Some(tagged) = room.as_deref() {
                    if tagged != self.room.as_str() {
                        if self.options.strict_room_filter {
                            log::debug!("Dropping '{}' tagged for {} (joined {})", event, tagged, self.room);
                            return;
                        }
                        log::debug!("Delivering '{}' tagged for {} on {}", event, tagged, self.room);
                    }
                }
                let delivered = self.hub.dispatch(Notification { room, event, payload });
                log::trace!("Event delivered to {} subscriber(s) in {}", delivered, self.room);
            }
            Some(ServerFrame::Error { message }) => log::warn!("Server error in {}: {}", self.room, message),
            Some(other) => log::debug!("Ignoring {:?} in {}", other, self.room),
            None => log::debug!("Ignoring unrecognised frame in {}: {}", self.room, text),
        }
    }
}
