//! Production orders shown on the shift-master page.
//!
//! The page lives in the department's room and reloads the stage's orders on
//! every `order:event`.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domains::rest_spec;
use crate::errors::{FetchError, HookError, PreconditionError};
use crate::live::LiveSpec;
use crate::retrieve::{ApiClient, PathTemplate};
use crate::rooms::Room;
use crate::session::{SessionContext, DEPARTMENT};

/// Room event that announces order changes.
pub const EVENT: &str = "order:event";
/// Statuses that trigger a reload.
pub const STATUSES: [&str; 5] = ["updated", "added", "created", "deleted", "removed"];
/// Collection endpoint.
pub const TEMPLATE: &str = "orders?stage_id={stage_id}";

/// One production order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Primary key.
    pub id: i64,
    /// Human-readable order number.
    #[serde(default)]
    pub number: String,
    /// Part being produced.
    #[serde(default)]
    pub part_name: Option<String>,
    /// Planned quantity.
    #[serde(default)]
    pub quantity: u32,
    /// Quantity finished so far.
    #[serde(default)]
    pub completed: u32,
    /// Workflow state as the backend names it.
    #[serde(default)]
    pub status: String,
    /// Any other fields; they take part in change detection.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The room of the session's department.
pub fn room(session: &SessionContext) -> Result<Room, PreconditionError> {
    session.require(DEPARTMENT, "orders").map(Room::department)
}

/// The orders page hook.
pub fn live_spec(api: Arc<ApiClient>, session: Arc<SessionContext>) -> LiveSpec<Order, i64> {
    rest_spec("orders", PathTemplate::new("orders", TEMPLATE), api, session, |o: &Order| o.id)
        .event(EVENT)
        .accept(STATUSES)
}

#[derive(Serialize)]
struct StatusChange<'a> {
    status: &'a str,
}

/// Moves order `order_id` to `status`; returns the updated order.
pub async fn update_order_status(api: &ApiClient, order_id: i64, status: &str) -> Result<Order, HookError> {
    if status.trim().is_empty() {
        return Err(FetchError::Encode("order status must not be empty".to_string()).into());
    }
    let path = format!("orders/{}/status", order_id);
    log::info!("Setting order {} to '{}'", order_id, status);
    Ok(api.send_json(Method::PUT, &path, &StatusChange { status }).await?)
}
