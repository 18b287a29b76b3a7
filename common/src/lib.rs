//! Shared building blocks for the RPC relay workspace.
//!
//! Holds the small types every other crate needs and that carry no
//! protocol logic of their own:
//!
//! - [`ErrorLocation`] - call-site capture attached to every error variant
//! - [`PairingToken`] - the node credential, redacted in logs and zeroized on drop

pub mod error;
pub mod pairing_token;

pub use error::error_location::ErrorLocation;
pub use error::token_error::TokenError;
pub use pairing_token::PairingToken;
