//! JSON text frames of the room protocol.
//!
//! ```text
//! client -> server   {"type":"join","room":"room:machines","client_id":"host-…"}
//!                    {"type":"leave","room":"room:machines"}
//! server -> client   {"type":"joined","room":"room:machines"}
//!                    {"type":"rejected","room":"room:machines","reason":"forbidden"}
//!                    {"type":"event","room":"room:machines","event":"detail:event","payload":{"status":"updated"}}
//!                    {"type":"error","message":"…"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Ask to be put into `room`.
    Join {
        /// Room name.
        room: String,
        /// Identifies this client in server logs.
        client_id: String,
    },
    /// Leave `room` before closing.
    Leave {
        /// Room name.
        room: String,
    },
}

impl ClientFrame {
    /// JSON text of the frame.
    pub fn to_text(&self) -> String {
        // Serializing a plain enum of strings cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Join acknowledged.
    Joined {
        /// Room name.
        room: String,
    },
    /// Join refused.
    Rejected {
        /// Room name.
        room: String,
        /// Reason text.
        #[serde(default)]
        reason: String,
    },
    /// A named event broadcast to the room.
    Event {
        /// Room the server says the event belongs to, when it says so.
        #[serde(default)]
        room: Option<String>,
        /// Event name, e.g. `order:event`.
        event: String,
        /// Event body, usually `{"status": "..."}`.
        #[serde(default)]
        payload: Value,
    },
    /// Server-side error report.
    Error {
        /// Error text.
        message: String,
    },
}

impl ServerFrame {
    /// Parses one text frame; anything unrecognised yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// JSON text of the frame.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
