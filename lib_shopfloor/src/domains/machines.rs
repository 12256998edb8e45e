//! Machine uptime statistics, the operator's current task and machine state
//! changes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domains::rest_spec;
use crate::errors::HookError;
use crate::live::LiveSpec;
use crate::retrieve::{ApiClient, PathTemplate};
use crate::rooms::Room;
use crate::session::SessionContext;

/// Room event that announces machine changes.
pub const EVENT: &str = "machine:event";
/// Statuses that trigger a reload.
pub const STATUSES: [&str; 1] = ["updated"];
/// Uptime endpoint.
pub const TEMPLATE: &str = "machines/uptime?stage_id={stage_id}";
/// Task endpoint; needs a machine.
pub const TASK_TEMPLATE: &str = "machines/{machine_id}/task";

/// Uptime figures of one machine. Keyed by `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineUptime {
    /// Machine code, unique per plant.
    pub code: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Current state.
    #[serde(default)]
    pub state: String,
    /// Share of the shift spent working, 0..=100.
    #[serde(default)]
    pub uptime_percent: f64,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// What the operator's machine is working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineTask {
    /// Order in work.
    pub order_id: i64,
    /// Part being machined.
    #[serde(default)]
    pub part_name: String,
    /// Operation number on the route.
    #[serde(default)]
    pub operation: Option<u32>,
    /// Parts still to do.
    #[serde(default)]
    pub remaining: u32,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Machine states an operator can switch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// Producing.
    Working,
    /// Being set up for the next order.
    Setup,
    /// Idle without a fault.
    Idle,
    /// Stopped for repair.
    Repair,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Working => "working",
            Self::Setup => "setup",
            Self::Idle => "idle",
            Self::Repair => "repair",
        };
        f.write_str(name)
    }
}

/// The shared machines room.
pub fn room() -> Room {
    Room::machines()
}

/// The uptime statistics page hook.
pub fn live_spec(api: Arc<ApiClient>, session: Arc<SessionContext>) -> LiveSpec<MachineUptime, String> {
    rest_spec(
        "uptime",
        PathTemplate::new("uptime", TEMPLATE),
        api,
        session,
        |m: &MachineUptime| m.code.clone(),
    )
    .event(EVENT)
    .accept(STATUSES)
}

/// The current task of the session's machine; `None` when it has none.
pub async fn fetch_machine_task(api: &ApiClient, session: &SessionContext) -> Result<Option<MachineTask>, HookError> {
    let path = PathTemplate::new("machine task", TASK_TEMPLATE).render(session)?;
    Ok(api.get_json::<Option<MachineTask>>(&path).await?)
}

#[derive(Serialize)]
struct StateChange {
    state: MachineState,
}

/// Switches the session's machine to `state`.
pub async fn set_machine_state(api: &ApiClient, session: &SessionContext, state: MachineState) -> Result<(), HookError> {
    let path = PathTemplate::new("machine state", "machines/{machine_id}/state").render(session)?;
    log::info!("Switching {} to {}", path, state);
    let _: Value = api.send_json(Method::POST, &path, &StateChange { state }).await?;
    Ok(())
}
