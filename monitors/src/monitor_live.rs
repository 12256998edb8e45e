//! # Live Page Monitor
//!
//! Mounts one dashboard page hook against a running backend and logs every
//! change of its state: the revision, what the last merge found, the last
//! error and the room connection status. Useful to watch what a page would
//! redraw without running the front-end.
//!
//! ```text
//! monitor_live --domain pallets --machine-id M-12 --ws-url ws://mes.local/ws
//! ```

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use tokio::signal;

use lib_shopfloor::configs::{load_config, LiveConfig};
use lib_shopfloor::domains::{machines, orders, packaging, pallets};
use lib_shopfloor::loggers::setup_logging;
use lib_shopfloor::{ApiClient, ConnectionHandle, LivePolicy, LiveResource, LiveSpec, Room, RoomClient};

/// Pages that can be monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Domain {
    Orders,
    Packaging,
    Pallets,
    Uptime,
}

#[derive(Parser, Debug)]
#[clap(about = "Watch a live dashboard page hook and log every reconciled change", version)]
struct Cli {
    #[clap(long, value_enum, env = "SHOPFLOOR_DOMAIN", help = "Page to mount.")]
    domain: Domain,

    #[clap(flatten)]
    config: LiveConfig,
}

/// Completes on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Mounts `spec` on `connection` and logs until shutdown.
async fn watch_page<T, K>(spec: LiveSpec<T, K>, connection: &ConnectionHandle, policy: LivePolicy) -> Result<()>
where
    T: Debug + PartialEq + Send + Sync + 'static,
    K: Eq + Hash + 'static,
{
    let name = spec.name().to_string();
    let hook = LiveResource::mount(spec, connection, policy).await;
    let mut states = hook.watch();
    let mut status = connection.watch_status();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        {
            let snap = states.borrow_and_update().clone();
            match (&snap.error, snap.last_merge) {
                (Some(e), _) => warn!("[{}] {:?}: {} (keeping {} rows)", name, snap.status, e, snap.data.len()),
                (None, Some(m)) => info!(
                    "[{}] rev {} {:?}: {} rows (+{} -{} ~{} ={}{})",
                    name,
                    snap.revision,
                    snap.status,
                    snap.data.len(),
                    m.added,
                    m.removed,
                    m.changed,
                    m.retained,
                    if m.reordered { ", reordered" } else { "" }
                ),
                (None, None) => info!("[{}] {:?}", name, snap.status),
            }
            if log::log_enabled!(log::Level::Trace) {
                for row in snap.data.iter() {
                    log::trace!("[{}]   {:?}", name, row);
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("[{}] Room {}: {:?}", name, connection.room(), *status.borrow_and_update());
            }
        }
    }

    info!("[{}] Shutting down", name);
    hook.unmount();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Environment, then flags (env already folded in by clap)
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // 2. Config and logging
    let config = load_config(cli.config).context("Failed to load configuration")?;
    let _guard = setup_logging(&config.log_dir(), config.log_level(), "monitor_live")
        .context("Failed to initialize logging")?;

    // 3. Shared collaborators
    let session = Arc::new(config.session());
    let api = Arc::new(ApiClient::new(config.api_base_url(), config.api_options()).context("Invalid API base URL")?);
    let rooms = RoomClient::new(config.ws_url(), config.connection_options()?).context("Invalid WebSocket URL")?;
    let policy = config.live_policy()?;

    // 4. The page
    let room: Room = match cli.domain {
        Domain::Orders => orders::room(&session).context("The orders page needs --department")?,
        Domain::Packaging => packaging::room(),
        Domain::Pallets => pallets::room(),
        Domain::Uptime => machines::room(),
    };
    info!("Monitoring {:?} in {}", cli.domain, room);
    let connection = rooms.open(room);

    let result = match cli.domain {
        Domain::Orders => watch_page(orders::live_spec(api, session), &connection, policy).await,
        Domain::Packaging => watch_page(packaging::live_spec(api, session), &connection, policy).await,
        Domain::Pallets => watch_page(pallets::live_spec(api, session), &connection, policy).await,
        Domain::Uptime => watch_page(machines::live_spec(api, session), &connection, policy).await,
    };

    connection.close().await;
    result
}
