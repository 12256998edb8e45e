//! # Live-Update Rooms
//!
//! A room is a named broadcast channel on the backend's WebSocket endpoint.
//! A page joins exactly one room and listens to a handful of named events in
//! it (`order:event`, `detail:event`, ...).
//!
//! ## Contained Modules:
//!
//! - **`room`**: the `Room` name type and the conventional room names.
//! - **`wire`**: the JSON frames exchanged with the server (join/leave
//!   handshake, events, errors).
//! - **`notification`**: the decoded event handed to subscribers.
//! - **`hub`**: the per-connection subscriber registry, keyed by event name.
//! - **`connection`**: `RoomClient::open` and the `ConnectionHandle` that owns
//!   the socket task, its observable status and the hub.

/// Room names.
pub mod room;
/// Wire frames of the room protocol.
pub mod wire;
/// Decoded notifications.
pub mod notification;
/// Subscriber registry keyed by event name.
pub mod hub;
/// Socket task, connection status and reconnect policy.
pub mod connection;

pub use connection::{
    ConnectionHandle, ConnectionOptions, ConnectionStatus, LoopbackFeed, ReconnectPolicy, RoomClient,
};
pub use hub::{EventHub, Subscription};
pub use notification::Notification;
pub use room::Room;
