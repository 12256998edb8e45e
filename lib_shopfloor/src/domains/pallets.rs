//! Pallets at the operator's machine and the transitions the operator can
//! trigger on them.

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

/// Room event that announces pallet changes.
pub const EVENT: &str = "detail:event";
/// Statuses that trigger a reload.
pub const STATUSES: [&str; 3] = ["updated", "created", "removed"];
/// Collection endpoint; needs a machine.
pub const TEMPLATE: &str = "machines/{machine_id}/pallets";

/// One pallet (buffer cell content) at a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pallet {
    /// Primary key.
    pub id: i64,
    /// Pallet label.
    #[serde(default)]
    pub code: String,
    /// Order the parts belong to.
    #[serde(default)]
    pub order_id: Option<i64>,
    /// Parts on the pallet.
    #[serde(default)]
    pub part_count: u32,
    /// Backend state (`waiting`, `in_work`, `done`, ...).
    #[serde(default)]
    pub state: String,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// What the operator can do with a pallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PalletTransition {
    /// Take the pallet into work.
    Take,
    /// Put it back into the buffer.
    Release,
    /// Mark its parts as done.
    Complete,
    /// Send it to inspection.
    Inspect,
}

impl fmt::Display for PalletTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Take => "take",
            Self::Release => "release",
            Self::Complete => "complete",
            Self::Inspect => "inspect",
        };
        f.write_str(name)
    }
}

/// The shared machines room.
pub fn room() -> Room {
    Room::machines()
}

/// The pallets page hook. Every fetch fails fast while no machine is assigned.
pub fn live_spec(api: Arc<ApiClient>, session: Arc<SessionContext>) -> LiveSpec<Pallet, i64> {
    rest_spec("pallets", PathTemplate::new("pallets", TEMPLATE), api, session, |p: &Pallet| p.id)
        .event(EVENT)
        .accept(STATUSES)
}

#[derive(Serialize)]
struct TransitionRequest {
    action: PalletTransition,
}

/// Applies `action` to pallet `pallet_id`; returns the pallet as stored.
pub async fn transition_pallet(
    api: &ApiClient,
    pallet_id: i64,
    action: PalletTransition,
) -> Result<Pallet, HookError> {
    log::info!("Pallet {}: {}", pallet_id, action);
    let path = format!("pallets/{}/transition", pallet_id);
    Ok(api
        .send_json(Method::POST, &path, &TransitionRequest { action })
        .await?)
}
