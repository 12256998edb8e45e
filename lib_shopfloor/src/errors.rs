//! # Error Taxonomy
//!
//! Every failure the live-data layer can observe falls into one of three
//! families, and all of them end up as observable state rather than a panic:
//!
//! - **`PreconditionError`**: a required session identifier (machine id,
//!   stage id, ...) is missing, so no request is issued at all.
//! - **`FetchError`**: the REST round-trip failed (transport, HTTP status,
//!   body decoding or timeout). The hook keeps its previous data.
//! - **`TransportError`**: the room connection could not be established or
//!   dropped. It is reported as a connection status, independently of fetches.
//!
//! `HookError` is the union stored as a live resource's "last error". All types
//! are `Clone` so they can be published through `watch` channels.

use std::time::Duration;

use thiserror::Error;

/// A required ambient parameter was not supplied by the session context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// The named session parameter (e.g. `machine_id`) is not set.
    #[error("required session parameter `{parameter}` is not set (needed by {resource})")]
    MissingParameter {
        /// Name of the missing parameter.
        parameter: String,
        /// The resource that needed it.
        resource: String,
    },
}

impl PreconditionError {
    /// Shorthand for [`PreconditionError::MissingParameter`].
    pub fn missing(parameter: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::MissingParameter {
            parameter: parameter.into(),
            resource: resource.into(),
        }
    }
}

/// A REST round-trip failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The path could not be joined onto the base URL.
    #[error("invalid request url '{0}'")]
    InvalidUrl(String),

    /// The request never produced a response (connection refused, DNS, TLS...).
    #[error("request to {url} failed: {message}")]
    Request {
        /// The absolute URL that was requested.
        url: String,
        /// Transport-level description.
        message: String,
    },

    /// The request exceeded the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// The absolute URL that was requested.
        url: String,
    },

    /// The server answered with a non-2xx status.
    #[error("request to {url} returned HTTP {status}")]
    Status {
        /// The absolute URL that was requested.
        url: String,
        /// Numeric HTTP status code.
        status: u16,
        /// Raw error body, when the server sent one.
        body: Option<String>,
    },

    /// The body could not be decoded into the expected type.
    #[error("could not decode response from {url}: {message}")]
    Decode {
        /// The absolute URL that was requested.
        url: String,
        /// Decoder message.
        message: String,
    },

    /// The request body could not be encoded.
    #[error("could not encode request body: {0}")]
    Encode(String),
}

impl FetchError {
    /// The HTTP status, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The live-update transport failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The WebSocket URL is malformed.
    #[error("invalid websocket url '{url}': {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        message: String,
    },

    /// The socket could not be opened.
    #[error("could not connect to {url}: {message}")]
    Connect {
        /// The URL that was dialled.
        url: String,
        /// Transport-level description.
        message: String,
    },

    /// The server refused to put us in the room.
    #[error("join of {room} rejected: {reason}")]
    JoinRejected {
        /// The room that was requested.
        room: String,
        /// Reason given by the server.
        reason: String,
    },

    /// No join acknowledgement arrived in time.
    #[error("no join acknowledgement for {room} within {timeout:?}")]
    JoinTimeout {
        /// The room that was requested.
        room: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// The server sent an error frame or broke the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The socket dropped after it had been established.
    #[error("connection lost: {0}")]
    Disconnected(String),
}

/// The error a live resource exposes as its "last error".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// A session parameter was missing; no request was made.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// The fetch itself failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl HookError {
    /// True when retrying cannot help until the session changes.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_error_names_parameter_and_resource() {
        let err = PreconditionError::missing("machine_id", "pallets");
        let text = err.to_string();
        assert!(text.contains("machine_id"));
        assert!(text.contains("pallets"));
    }

    #[test]
    fn hook_error_converts_from_both_families() {
        let pre: HookError = PreconditionError::missing("stage_id", "orders").into();
        assert!(pre.is_precondition());

        let fetch: HookError = FetchError::Status {
            url: "http://x/orders".into(),
            status: 503,
            body: None,
        }
        .into();
        assert!(!fetch.is_precondition());
        match &fetch {
            HookError::Fetch(inner) => assert_eq!(inner.status(), Some(503)),
            _ => panic!("Expected HookError::Fetch"),
        }
    }

    #[test]
    fn transport_error_display_mentions_room() {
        let err = TransportError::JoinRejected {
            room: "room:machines".into(),
            reason: "forbidden".into(),
        };
        assert_eq!(err.to_string(), "join of room:machines rejected: forbidden");
    }
}
