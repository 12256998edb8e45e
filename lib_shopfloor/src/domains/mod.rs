//! # Page Domains
//!
//! The four live pages of the dashboards, each reduced to a record type and a
//! [`LiveSpec`]: where to fetch, how to key, which room event to follow and
//! which statuses matter. The REST transitions the pages trigger live next to
//! their records.
//!
//! | domain      | room               | event            | statuses                                  |
//! |-------------|--------------------|------------------|-------------------------------------------|
//! | `orders`    | `room:<department>`| `order:event`    | updated, added, created, deleted, removed |
//! | `packaging` | `room:packaging`   | `package:event`  | added, updated, deleted                   |
//! | `pallets`   | `room:machines`    | `detail:event`   | updated, created, removed                 |
//! | `machines`  | `room:machines`    | `machine:event`  | updated                                   |

use std::hash::Hash;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::errors::HookError;
use crate::live::LiveSpec;
use crate::retrieve::{ApiClient, PathTemplate};
use crate::session::SessionContext;

/// Machine uptime and machine task.
pub mod machines;
/// Production orders of a stage.
pub mod orders;
/// Packaging lines.
pub mod packaging;
/// Pallets at the operator's machine.
pub mod pallets;

/// Renders `template` against `session` and GETs the collection behind it.
pub async fn fetch_collection<T>(
    api: &ApiClient,
    session: &SessionContext,
    template: &PathTemplate,
) -> Result<Vec<T>, HookError>
where
    T: DeserializeOwned,
{
    let path = template.render(session)?;
    Ok(api.get_json::<Vec<T>>(&path).await?)
}

/// A spec whose fetch is [`fetch_collection`] with the given arguments.
pub(crate) fn rest_spec<T, K, KF>(
    name: &str,
    template: PathTemplate,
    api: Arc<ApiClient>,
    session: Arc<SessionContext>,
    key_of: KF,
) -> LiveSpec<T, K>
where
    T: DeserializeOwned + Send + 'static,
    K: Eq + Hash,
    KF: Fn(&T) -> K + Send + Sync + 'static,
{
    LiveSpec::new(
        name,
        move || {
            let api = Arc::clone(&api);
            let session = Arc::clone(&session);
            let template = template.clone();
            async move { fetch_collection(&api, &session, &template).await }
        },
        key_of,
    )
}
