//! Packaging lines and what they are currently packing.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domains::rest_spec;
use crate::live::LiveSpec;
use crate::retrieve::{ApiClient, PathTemplate};
use crate::rooms::Room;
use crate::session::SessionContext;

/// Room event that announces packaging changes.
pub const EVENT: &str = "package:event";
/// Statuses that trigger a reload.
pub const STATUSES: [&str; 3] = ["added", "updated", "deleted"];
/// Collection endpoint.
pub const TEMPLATE: &str = "packaging";

/// One packaging line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagingLine {
    /// Primary key.
    pub id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Order being packed, if any.
    #[serde(default)]
    pub order_id: Option<i64>,
    /// Boxes packed.
    #[serde(default)]
    pub packed: u32,
    /// Boxes planned.
    #[serde(default)]
    pub planned: u32,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The packaging room.
pub fn room() -> Room {
    Room::packaging()
}

/// The packaging page hook.
pub fn live_spec(api: Arc<ApiClient>, session: Arc<SessionContext>) -> LiveSpec<PackagingLine, i64> {
    rest_spec(
        "packaging",
        PathTemplate::new("packaging", TEMPLATE),
        api,
        session,
        |line: &PackagingLine| line.id,
    )
    .event(EVENT)
    .accept(STATUSES)
}
