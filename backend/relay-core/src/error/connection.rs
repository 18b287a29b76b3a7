use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::http::StatusCode;

#[derive(Debug, ThisError)]
pub enum ConnectionError {
    #[error("Address Error: {message} {location}")]
    Address {
        message: String,
        location: ErrorLocation,
    },

    #[error("Connect Error: {message} {location}")]
    Connect {
        message: String,
        location: ErrorLocation,
    },

    #[error("Rejected Error: node answered HTTP {status} {location}")]
    Rejected {
        status: u16,
        location: ErrorLocation,
    },

    #[error("Timeout Error: {message} {location}")]
    Timeout {
        message: String,
        location: ErrorLocation,
    },

    #[error("Send Error: {message} {location}")]
    Send {
        message: String,
        location: ErrorLocation,
    },
}

impl ConnectionError {
    /// The node refused the credential, retrying with the same token is pointless.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ConnectionError::Rejected { status, .. }
                if *status == StatusCode::UNAUTHORIZED.as_u16()
                    || *status == StatusCode::FORBIDDEN.as_u16()
        )
    }
}

impl From<WsError> for ConnectionError {
    #[track_caller]
    fn from(error: WsError) -> Self {
        match error {
            WsError::Http(response) => ConnectionError::Rejected {
                status: response.status().as_u16(),
                location: ErrorLocation::from(Location::caller()),
            },
            other => ConnectionError::Connect {
                message: other.to_string(),
                location: ErrorLocation::from(Location::caller()),
            },
        }
    }
}

impl From<url::ParseError> for ConnectionError {
    #[track_caller]
    fn from(error: url::ParseError) -> Self {
        ConnectionError::Address {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
