pub mod store;

pub use store::{ConfigCommand, ConfigStore};

use crate::error::config::ConfigError;
use crate::{DEFAULT_UI_ADDRESS, HTTP_SCHEME, RELAY_APP_NAME, WS_SCHEME};

use common::{ErrorLocation, PairingToken};

use std::panic::Location;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

pub const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_VERSION: u32 = 1;

// ============================================
// CONFIG STRUCTS
// ============================================

/// Persisted relay settings: the pairing credential plus where the node lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub token: Option<PairingToken>,

    #[serde(default)]
    pub session_seed: Option<String>,

    /// `host:port` serving both the node UI (HTTP) and its RPC socket (WebSocket).
    #[serde(default = "default_ui_address")]
    pub ui_address: String,

    #[serde(default = "default_integration_enabled")]
    pub integration_enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            token: None,
            session_seed: None,
            ui_address: default_ui_address(),
            integration_enabled: default_integration_enabled(),
        }
    }
}

/// Partial update merged into the stored config.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    pub token: Option<Option<PairingToken>>,
    pub session_seed: Option<Option<String>>,
    pub ui_address: Option<String>,
    pub integration_enabled: Option<bool>,
}

impl ConfigPatch {
    /// Patch that stores a freshly delivered credential.
    pub fn pairing(token: PairingToken, session_seed: Option<String>) -> Self {
        Self {
            token: Some(Some(token)),
            session_seed: Some(session_seed),
            ..Default::default()
        }
    }

    /// Patch that forgets the credential after the node rejected it.
    pub fn forget_pairing() -> Self {
        Self {
            token: Some(None),
            session_seed: Some(None),
            ..Default::default()
        }
    }

    pub fn apply(self, config: &mut RelayConfig) {
        if let Some(token) = self.token {
            config.token = token;
        }
        if let Some(session_seed) = self.session_seed {
            config.session_seed = session_seed;
        }
        if let Some(ui_address) = self.ui_address {
            config.ui_address = ui_address;
        }
        if let Some(enabled) = self.integration_enabled {
            config.integration_enabled = enabled;
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_ui_address() -> String {
    DEFAULT_UI_ADDRESS.to_string()
}
fn default_integration_enabled() -> bool {
    true
}

// ============================================
// IMPLEMENTATION
// ============================================

/// Resolve the directory holding `config.json`.
///
/// An explicit override wins; otherwise `<platform config dir>/rpc-relay`.
pub fn resolve_config_dir(override_dir: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = override_dir {
        return Ok(dir);
    }

    dirs::config_dir()
        .map(|dir| dir.join(RELAY_APP_NAME))
        .ok_or_else(|| ConfigError::DirectoryNotFound {
            location: ErrorLocation::from(Location::caller()),
            reason: "platform has no config directory".to_string(),
        })
}

impl RelayConfig {
    /// Load config from {config_dir}/config.json.
    ///
    /// # Returns
    ///
    /// Returns `Ok(RelayConfig)` if loaded successfully or defaults if file missing.
    /// Returns `Err(ConfigError)` if file exists but is corrupted/invalid.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read config file: {}", e);
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: RelayConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config JSON: {}", e);
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!(
            "Config loaded from {} (paired: {})",
            config_path.display(),
            config.token.is_some()
        );
        Ok(config)
    }

    /// Save config to {config_dir}/config.json using atomic write.
    ///
    /// Uses temp file + rename so a crash never leaves a half-written token.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let temp_path = config_dir.join(format!("{}.tmp", CONFIG_FILE_NAME));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid version: {} (expected 1-{})",
                    self.version, CONFIG_VERSION
                ),
            });
        }

        self.ui_url()?;

        if let Some(ref seed) = self.session_seed
            && seed.is_empty()
        {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: "session_seed cannot be empty string".to_string(),
            });
        }

        Ok(())
    }

    /// `http://<ui_address>/` - probed during pairing.
    pub fn ui_url(&self) -> Result<Url, ConfigError> {
        address_url(HTTP_SCHEME, &self.ui_address)
    }

    /// `ws://<ui_address>/` - the node RPC socket.
    pub fn node_url(&self) -> Result<Url, ConfigError> {
        address_url(WS_SCHEME, &self.ui_address)
    }

    /// Origin of pages served by the node UI. Only this origin may deliver tokens.
    pub fn ui_origin(&self) -> Result<String, ConfigError> {
        Ok(self.ui_url()?.origin().ascii_serialization())
    }
}

fn address_url(scheme: &str, address: &str) -> Result<Url, ConfigError> {
    if address.is_empty() || address.contains('/') {
        return Err(ConfigError::ValidationError {
            location: ErrorLocation::from(Location::caller()),
            reason: format!("Invalid UI address: '{address}' (expected host:port)"),
        });
    }

    let url = Url::parse(&format!("{scheme}{address}")).map_err(|e| {
        ConfigError::ValidationError {
            location: ErrorLocation::from(Location::caller()),
            reason: format!("Invalid UI address '{address}': {e}"),
        }
    })?;

    if url.host_str().is_none() {
        return Err(ConfigError::ValidationError {
            location: ErrorLocation::from(Location::caller()),
            reason: format!("UI address '{address}' has no host"),
        });
    }

    Ok(url)
}
