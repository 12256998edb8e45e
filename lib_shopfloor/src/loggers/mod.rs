//! # Loggers Module
//!
//! Process-wide logging for binaries built on this crate. Library code only
//! emits through the `log` facade; `setup_logging` installs a `tracing`
//! subscriber that prints to the console, writes a per-run file and picks up
//! `log` records on the way.

/// Subscriber installation and log-file housekeeping.
pub mod logger_sys;

pub use logger_sys::{cleanup_old_logs, setup_logging, LoggerError};
