use relay_core::error::config::ConfigError;
use relay_core::error::relay::RelayError;

use common::ErrorLocation;

use std::panic::Location;

use serde::Serialize;
use thiserror::Error;

/// Errors that stop the daemon from starting or running.
///
/// Serializable so they can be written as a single JSON line for
/// supervisors that parse the exit log.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayDaemonError {
    /// Error from this app
    #[error("Relay Daemon Error: {message} {location}")]
    Daemon {
        message: String,
        location: ErrorLocation,
    },

    /// Bad environment setting
    #[error("Settings Error: {message} {location}")]
    Settings {
        message: String,
        location: ErrorLocation,
    },

    /// Error from relay-core (config, transport, server)
    #[error("Core Error: {message} {location}")]
    Core {
        message: String,
        location: ErrorLocation,
    },
}

impl RelayDaemonError {
    #[track_caller]
    pub fn daemon(message: impl Into<String>) -> Self {
        RelayDaemonError::Daemon {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn settings(message: impl Into<String>) -> Self {
        RelayDaemonError::Settings {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ConfigError> for RelayDaemonError {
    #[track_caller]
    fn from(error: ConfigError) -> Self {
        RelayDaemonError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<RelayError> for RelayDaemonError {
    #[track_caller]
    fn from(error: RelayError) -> Self {
        RelayDaemonError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
