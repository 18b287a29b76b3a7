use crate::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum TokenError {
    #[error("Empty Token Error: {message} {location}")]
    Empty {
        message: String,
        location: ErrorLocation,
    },

    #[error("Invalid Token Error: {message} {location}")]
    Invalid {
        message: String,
        location: ErrorLocation,
    },
}
