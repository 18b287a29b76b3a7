//! Error taxonomy shared by the provider, relay and session transport.
//!
//! Key design decisions:
//! - Every variant maps onto a wire [`ErrorCode`] so failures cross process
//!   boundaries without losing their kind
//! - `MalformedMessage` and `UnexpectedResponse` are log-only: they are built
//!   for the log line and never handed to a waiting caller
//! - All errors include ErrorLocation for debugging

use crate::proto::ErrorCode;

use common::ErrorLocation;

use std::panic::Location;
use std::time::Duration;

use thiserror::Error as ThisError;

#[derive(Debug, Clone, ThisError)]
pub enum TransportError {
    #[error("Uninitialized Transport: {message} {location}")]
    Uninitialized {
        message: String,
        location: ErrorLocation,
    },

    #[error("Request Timeout: request #{id} got no response within {window:?} {location}")]
    RequestTimeout {
        id: u64,
        window: Duration,
        location: ErrorLocation,
    },

    #[error("Malformed Message: {message} {location}")]
    MalformedMessage {
        message: String,
        location: ErrorLocation,
    },

    #[error("Pairing Fetch Failure: {message} {location}")]
    PairingFetchFailure {
        message: String,
        location: ErrorLocation,
    },

    #[error("Unexpected Response: {message} {location}")]
    UnexpectedResponse {
        message: String,
        location: ErrorLocation,
    },

    #[error("RPC Error: {message} {location}")]
    Rpc {
        message: String,
        location: ErrorLocation,
    },

    #[error("Transport Closed: {message} {location}")]
    Closed {
        message: String,
        location: ErrorLocation,
    },
}

impl TransportError {
    #[track_caller]
    pub fn uninitialized(message: impl Into<String>) -> Self {
        TransportError::Uninitialized {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn timeout(id: u64, window: Duration) -> Self {
        TransportError::RequestTimeout {
            id,
            window,
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn malformed(message: impl Into<String>) -> Self {
        TransportError::MalformedMessage {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn pairing_fetch(message: impl Into<String>) -> Self {
        TransportError::PairingFetchFailure {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn unexpected(message: impl Into<String>) -> Self {
        TransportError::UnexpectedResponse {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn rpc(message: impl Into<String>) -> Self {
        TransportError::Rpc {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn closed(message: impl Into<String>) -> Self {
        TransportError::Closed {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Rebuild an error from the code carried in a relay response.
    #[track_caller]
    pub fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::Uninitialized => Self::uninitialized("node connection unavailable"),
            ErrorCode::Rpc(message) => Self::rpc(message.clone()),
            ErrorCode::InvalidRequest(message) => Self::malformed(message.clone()),
        }
    }

    /// Wire code forwarded to the page for this failure.
    pub fn to_code(&self) -> ErrorCode {
        match self {
            TransportError::Uninitialized { .. } | TransportError::Closed { .. } => {
                ErrorCode::Uninitialized
            }
            TransportError::MalformedMessage { message, .. } => {
                ErrorCode::InvalidRequest(message.clone())
            }
            TransportError::Rpc { message, .. }
            | TransportError::PairingFetchFailure { message, .. }
            | TransportError::UnexpectedResponse { message, .. } => ErrorCode::Rpc(message.clone()),
            TransportError::RequestTimeout { id, window, .. } => {
                ErrorCode::Rpc(format!("request #{id} timed out after {window:?}"))
            }
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(self, TransportError::Uninitialized { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::RequestTimeout { .. })
    }

    /// Get error category for log correlation.
    pub fn error_category(&self) -> &'static str {
        match self {
            TransportError::Uninitialized { .. } => "uninitialized",
            TransportError::RequestTimeout { .. } => "timeout",
            TransportError::MalformedMessage { .. } => "malformed",
            TransportError::PairingFetchFailure { .. } => "pairing_fetch",
            TransportError::UnexpectedResponse { .. } => "unexpected",
            TransportError::Rpc { .. } => "rpc",
            TransportError::Closed { .. } => "closed",
        }
    }
}

impl From<serde_json::Error> for TransportError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        TransportError::MalformedMessage {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
