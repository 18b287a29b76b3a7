//! Process settings from the environment (and an optional `.env`).

use crate::error::RelayDaemonError;
use crate::logger::DEFAULT_LOG_LEVEL;

use relay_core::RELAY_APP_NAME;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use log::{LevelFilter, info, warn};
use uuid::Uuid;

pub const CONFIG_DIR_VAR: &str = "RPC_RELAY_CONFIG_DIR";
pub const LOG_DIR_VAR: &str = "RPC_RELAY_LOG_DIR";
pub const LISTEN_VAR: &str = "RPC_RELAY_LISTEN";
pub const UI_ADDRESS_VAR: &str = "RPC_RELAY_UI_ADDRESS";
pub const OPENER_VAR: &str = "RPC_RELAY_OPENER";
pub const CLIENT_ID_VAR: &str = "RPC_RELAY_CLIENT_ID";
pub const LOG_LEVEL_VAR: &str = "RPC_RELAY_LOG_LEVEL";

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8545";

#[cfg(target_os = "macos")]
pub const DEFAULT_OPENER: &str = "open";

#[cfg(target_os = "windows")]
pub const DEFAULT_OPENER: &str = "explorer";

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const DEFAULT_OPENER: &str = "xdg-open";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Overrides the platform config directory when set.
    pub config_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    /// Where the relay WebSocket server listens for pages.
    pub listen: SocketAddr,
    /// Overrides the stored `ui_address` when set.
    pub ui_address: Option<String>,
    /// Command line used to open the pairing page; the URL is appended.
    pub opener: String,
    pub client_id: String,
    pub log_level: LevelFilter,
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, RelayDaemonError> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded .env from: {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Ignoring unreadable .env: {e}"),
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayDaemonError> {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let listen = value(LISTEN_VAR).unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = SocketAddr::from_str(&listen).map_err(|e| {
            RelayDaemonError::settings(format!("{LISTEN_VAR}='{listen}' is not a socket address: {e}"))
        })?;

        let log_level = match value(LOG_LEVEL_VAR) {
            Some(raw) => LevelFilter::from_str(&raw).map_err(|_| {
                RelayDaemonError::settings(format!("{LOG_LEVEL_VAR}='{raw}' is not a log level"))
            })?,
            None => DEFAULT_LOG_LEVEL,
        };

        let log_dir = match value(LOG_DIR_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => default_log_dir()?,
        };

        Ok(Self {
            config_dir: value(CONFIG_DIR_VAR).map(PathBuf::from),
            log_dir,
            listen,
            ui_address: value(UI_ADDRESS_VAR),
            opener: value(OPENER_VAR).unwrap_or_else(|| DEFAULT_OPENER.to_string()),
            client_id: value(CLIENT_ID_VAR).unwrap_or_else(|| Uuid::new_v4().to_string()),
            log_level,
        })
    }
}

fn default_log_dir() -> Result<PathBuf, RelayDaemonError> {
    dirs::data_local_dir()
        .map(|dir| dir.join(RELAY_APP_NAME).join("logs"))
        .ok_or_else(|| {
            RelayDaemonError::settings(format!(
                "no platform data directory, set {LOG_DIR_VAR}"
            ))
        })
}
