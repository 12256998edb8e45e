//! # Configuration Module
//!
//! Layered settings for processes that host live pages: built-in defaults, a
//! JSON config file, then environment variables and command-line flags.

/// `LiveConfig` and its loader.
pub mod config_sys;

pub use config_sys::{load_config, ConfigError, LiveConfig};
