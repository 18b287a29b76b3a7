pub mod config;
pub mod connection;
pub mod pairing;
pub mod relay;
pub mod transport;

pub use transport::TransportError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    #[error(transparent)]
    Connection(#[from] connection::ConnectionError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Pairing(#[from] pairing::PairingError),

    #[error(transparent)]
    Relay(#[from] relay::RelayError),
}
