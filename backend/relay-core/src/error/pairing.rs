use common::ErrorLocation;

use std::error::Error as StdError;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum PairingError {
    #[error("Launch Error: {message} {location}")]
    Launch {
        message: String,
        location: ErrorLocation,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("Pairing URL Error: {message} {location}")]
    Url {
        message: String,
        location: ErrorLocation,
    },
}
