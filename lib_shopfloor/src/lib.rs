//! # lib_shopfloor
//!
//! Room-scoped live data for the shopfloor dashboards. A page joins a room on
//! the backend's WebSocket endpoint, listens to a few named events, debounces
//! bursts of them into a single REST refetch and merges the result into the
//! data it already shows, keeping unchanged rows by reference.
//!
//! The live core (`errors`, `session`, `retrieve`, `rooms`, `live`, `domains`,
//! `utils`) is always compiled. `configs` and `loggers` are behind features
//! of the same name (`full` enables both).

#![forbid(unsafe_code)]

// Declare the modules to re-export
pub mod domains;
pub mod errors;
pub mod live;
pub mod retrieve;
pub mod rooms;
pub mod session;
pub mod utils;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;

pub use errors::{FetchError, HookError, PreconditionError, TransportError};
pub use live::{HookSnapshot, HookStatus, LivePolicy, LiveResource, LiveSpec, RefreshOutcome};
pub use retrieve::{ApiClient, ApiClientOptions};
pub use rooms::{ConnectionHandle, ConnectionStatus, ReconnectPolicy, Room, RoomClient};
pub use session::SessionContext;
