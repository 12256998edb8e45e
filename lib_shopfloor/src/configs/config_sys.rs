use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::live::LivePolicy;
use crate::retrieve::ApiClientOptions;
use crate::rooms::{ConnectionOptions, ReconnectPolicy};
use crate::session::SessionContext;

/// File looked up in the working directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "shopfloor.conf";

const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api/";
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`LiveConfig`].
    #[error("failed to parse config file {path}: {message}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// A value is out of range or unknown.
    #[error("invalid value for {key}: {message}")]
    Invalid {
        /// camelCase key name.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// # Live Config
///
/// Every field is optional so layers can be merged: a `Some` in a later layer
/// wins. After [`load_config`] all fields with a default are filled.
#[derive(Args, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    #[clap(long, env = "SHOPFLOOR_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SHOPFLOOR_API_URL", help = "Base URL of the REST API.")]
    pub api_base_url: Option<String>,

    #[clap(long, env = "SHOPFLOOR_WS_URL", help = "WebSocket endpoint of the room server.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "SHOPFLOOR_AUTH_TOKEN", help = "Bearer token for REST calls.")]
    pub auth_token: Option<String>,

    #[clap(long, env = "SHOPFLOOR_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SHOPFLOOR_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SHOPFLOOR_DEBOUNCE_MS", help = "Quiet window in milliseconds before a refresh fires.")]
    pub debounce_ms: Option<u64>,

    #[clap(long, env = "SHOPFLOOR_REQUEST_TIMEOUT_MS", help = "REST request timeout in milliseconds (0 disables).")]
    pub request_timeout_ms: Option<u64>,

    #[clap(long, env = "SHOPFLOOR_MAX_RETRIES", help = "Retries for transient REST failures.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "SHOPFLOOR_JOIN_TIMEOUT_MS", help = "Time allowed for a room join acknowledgement.")]
    pub join_timeout_ms: Option<u64>,

    #[clap(long, env = "SHOPFLOOR_RECONNECT_MODE", help = "Room reconnect mode: never, fixed or backoff.")]
    pub reconnect_mode: Option<String>,

    #[clap(long, env = "SHOPFLOOR_RECONNECT_BASE_DELAY_MS", help = "Fixed delay, or first backoff delay, in milliseconds.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "SHOPFLOOR_RECONNECT_MAX_DELAY_MS", help = "Backoff ceiling in milliseconds.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "SHOPFLOOR_STRICT_ROOM_FILTER", help = "Drop events tagged for another room (true/false).")]
    pub strict_room_filter: Option<bool>,

    #[clap(long, env = "SHOPFLOOR_MACHINE_ID", help = "Machine assigned to this session.")]
    pub machine_id: Option<String>,

    #[clap(long, env = "SHOPFLOOR_STAGE_ID", help = "Production stage of this session.")]
    pub stage_id: Option<String>,

    #[clap(long, env = "SHOPFLOOR_ROLE", help = "Role of the session user.")]
    pub role: Option<String>,

    #[clap(long, env = "SHOPFLOOR_DEPARTMENT", help = "Department of the session user.")]
    pub department: Option<String>,

    #[clap(long, env = "SHOPFLOOR_USER_NAME", help = "Name of the session user.")]
    pub user_name: Option<String>,
}

impl LiveConfig {
    /// Built-in defaults.
    pub fn defaults() -> Self {
        Self {
            api_base_url: Some(DEFAULT_API_URL.to_string()),
            ws_url: Some(DEFAULT_WS_URL.to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            debounce_ms: Some(300),
            request_timeout_ms: Some(10_000),
            max_retries: Some(0),
            join_timeout_ms: Some(5_000),
            reconnect_mode: Some("never".to_string()),
            reconnect_base_delay_ms: Some(1_000),
            reconnect_max_delay_ms: Some(60_000),
            strict_room_filter: Some(false),
            ..Default::default()
        }
    }

    /// Merges two configs; `other` overrides `self` for `Some` values.
    pub fn merge(self, other: LiveConfig) -> LiveConfig {
        LiveConfig {
            config_path: other.config_path.or(self.config_path),
            api_base_url: other.api_base_url.or(self.api_base_url),
            ws_url: other.ws_url.or(self.ws_url),
            auth_token: other.auth_token.or(self.auth_token),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            debounce_ms: other.debounce_ms.or(self.debounce_ms),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            max_retries: other.max_retries.or(self.max_retries),
            join_timeout_ms: other.join_timeout_ms.or(self.join_timeout_ms),
            reconnect_mode: other.reconnect_mode.or(self.reconnect_mode),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            strict_room_filter: other.strict_room_filter.or(self.strict_room_filter),
            machine_id: other.machine_id.or(self.machine_id),
            stage_id: other.stage_id.or(self.stage_id),
            role: other.role.or(self.role),
            department: other.department.or(self.department),
            user_name: other.user_name.or(self.user_name),
        }
    }

    /// REST base URL.
    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    /// Room server URL.
    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or(DEFAULT_WS_URL)
    }

    /// Log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    /// Log level.
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Debounce window; zero is rejected.
    pub fn debounce_window(&self) -> Result<Duration, ConfigError> {
        match self.debounce_ms.unwrap_or(300) {
            0 => Err(ConfigError::Invalid {
                key: "debounceMs",
                message: "must be greater than zero".to_string(),
            }),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    /// REST timeout; `None` when set to 0.
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms.unwrap_or(10_000) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Room reconnect behaviour.
    pub fn reconnect_policy(&self) -> Result<ReconnectPolicy, ConfigError> {
        let base = Duration::from_millis(self.reconnect_base_delay_ms.unwrap_or(1_000));
        let max = Duration::from_millis(self.reconnect_max_delay_ms.unwrap_or(60_000));
        let mode = self.reconnect_mode.as_deref().unwrap_or("never").trim().to_lowercase();
        match mode.as_str() {
            "never" | "" => Ok(ReconnectPolicy::Never),
            "fixed" => Ok(ReconnectPolicy::Fixed(base)),
            "backoff" if base <= max => Ok(ReconnectPolicy::Backoff { base, max }),
            "backoff" => Err(ConfigError::Invalid {
                key: "reconnectMaxDelayMs",
                message: "must not be smaller than reconnectBaseDelayMs".to_string(),
            }),
            other => Err(ConfigError::Invalid {
                key: "reconnectMode",
                message: format!("unknown mode '{}' (expected never, fixed or backoff)", other),
            }),
        }
    }

    /// Options for `RoomClient::new`.
    pub fn connection_options(&self) -> Result<ConnectionOptions, ConfigError> {
        Ok(ConnectionOptions {
            join_timeout: Duration::from_millis(self.join_timeout_ms.unwrap_or(5_000)),
            reconnect: self.reconnect_policy()?,
            strict_room_filter: self.strict_room_filter.unwrap_or(false),
            ..ConnectionOptions::default()
        })
    }

    /// Options for `ApiClient::new`.
    pub fn api_options(&self) -> ApiClientOptions {
        ApiClientOptions {
            auth_token: self.auth_token.clone().filter(|t| !t.is_empty()),
            timeout: self.request_timeout(),
            max_retries: self.max_retries.unwrap_or(0),
            ..ApiClientOptions::default()
        }
    }

    /// Timing policy for live resources.
    pub fn live_policy(&self) -> Result<LivePolicy, ConfigError> {
        Ok(LivePolicy::with_debounce(self.debounce_window()?))
    }

    /// The session identifiers carried by this config.
    pub fn session(&self) -> SessionContext {
        let mut session = SessionContext::new();
        if let Some(v) = &self.machine_id {
            session = session.with_machine_id(v.as_str());
        }
        if let Some(v) = &self.stage_id {
            session = session.with_stage_id(v.as_str());
        }
        if let Some(v) = &self.role {
            session = session.with_role(v.as_str());
        }
        if let Some(v) = &self.department {
            session = session.with_department(v.as_str());
        }
        if let Some(v) = &self.user_name {
            session = session.with_user_name(v.as_str());
        }
        session
    }

    /// Checks every derived value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.debounce_window()?;
        self.reconnect_policy()?;
        for (key, url) in [("apiBaseUrl", self.api_base_url()), ("wsUrl", self.ws_url())] {
            url::Url::parse(url).map_err(|e| ConfigError::Invalid {
                key,
                message: format!("'{}': {}", url, e),
            })?;
        }
        Ok(())
    }
}

/// Reads a JSON config file.
pub fn read_config_file(path: &Path) -> Result<LiveConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// The config file to use: `--config-path`, else `shopfloor.conf` in the
/// working directory, else `<config dir>/shopfloor/shopfloor.conf`.
fn resolve_config_path(cli: &LiveConfig) -> Option<PathBuf> {
    if let Some(path) = &cli.config_path {
        return Some(path.clone());
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("shopfloor").join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
}

/// # Load Config
///
/// 1. Start from [`LiveConfig::defaults`].
/// 2. Merge the config file, if one is found.
/// 3. Merge `cli` (clap has already folded environment variables into it).
/// 4. Validate.
///
/// An explicitly given `--config-path` that does not exist is an error; a
/// missing default file is not.
pub fn load_config(cli: LiveConfig) -> Result<LiveConfig, ConfigError> {
    let mut config = LiveConfig::defaults();

    match resolve_config_path(&cli) {
        Some(path) => {
            let file_config = read_config_file(&path)?;
            log::info!("Loaded config file {}", path.display());
            config = config.merge(file_config);
        }
        None => log::info!("No config file found. Using defaults and environment/CLI values."),
    }

    config = config.merge(cli);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn later_layers_win() {
        let file = LiveConfig {
            debounce_ms: Some(150),
            stage_id: Some("7".into()),
            ..Default::default()
        };
        let cli = LiveConfig {
            debounce_ms: Some(50),
            ..Default::default()
        };
        let merged = LiveConfig::defaults().merge(file).merge(cli);
        assert_eq!(merged.debounce_ms, Some(50));
        assert_eq!(merged.stage_id.as_deref(), Some("7"));
        assert_eq!(merged.log_level(), "info");
    }

    #[test]
    fn file_layer_is_camel_case_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"apiBaseUrl": "http://mes.local/api/", "reconnectMode": "fixed", "reconnectBaseDelayMs": 5000, "machineId": "M-3"}}"#
        )
        .unwrap();

        let cli = LiveConfig {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = load_config(cli).unwrap();
        assert_eq!(config.api_base_url(), "http://mes.local/api/");
        assert_eq!(config.reconnect_policy().unwrap(), ReconnectPolicy::Fixed(Duration::from_secs(5)));
        assert_eq!(config.session().machine_id(), Some("M-3"));
        assert_eq!(config.ws_url(), DEFAULT_WS_URL);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = LiveConfig {
            config_path: Some(dir.path().join("absent.conf")),
            ..Default::default()
        };
        assert!(matches!(load_config(cli), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero = LiveConfig {
            debounce_ms: Some(0),
            ..LiveConfig::defaults()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid { key: "debounceMs", .. })));

        let mode = LiveConfig {
            reconnect_mode: Some("sometimes".into()),
            ..LiveConfig::defaults()
        };
        assert!(matches!(mode.validate(), Err(ConfigError::Invalid { key: "reconnectMode", .. })));

        let url = LiveConfig {
            ws_url: Some("not a url".into()),
            ..LiveConfig::defaults()
        };
        assert!(matches!(url.validate(), Err(ConfigError::Invalid { key: "wsUrl", .. })));
    }

    #[test]
    fn derived_options() {
        let config = LiveConfig {
            request_timeout_ms: Some(0),
            reconnect_mode: Some("Backoff".into()),
            strict_room_filter: Some(true),
            auth_token: Some(String::new()),
            ..LiveConfig::defaults()
        };
        assert_eq!(config.request_timeout(), None);
        let options = config.connection_options().unwrap();
        assert!(options.strict_room_filter);
        assert_eq!(
            options.reconnect,
            ReconnectPolicy::Backoff {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60)
            }
        );
        assert_eq!(config.api_options().auth_token, None);
        assert_eq!(config.live_policy().unwrap().debounce_window, Duration::from_millis(300));
    }
}
