pub mod config;
pub mod error;
pub mod node;
pub mod pairing;
pub mod proto;
pub mod provider;
pub mod relay;
pub mod transport;

#[cfg(test)]
mod tests;

pub const RELAY_APP_NAME: &str = "rpc-relay";
pub const DEFAULT_UI_ADDRESS: &str = "127.0.0.1:8180";
pub const HTTP_SCHEME: &str = "http://";
pub const WS_SCHEME: &str = "ws://";
pub const DEFAULT_UI_URL: &str = const_format::concatcp!(HTTP_SCHEME, DEFAULT_UI_ADDRESS);

pub const JSONRPC_VERSION: &str = "2.0";
pub const CLIENT_VERSION_METHOD: &str = "web3_clientVersion";
pub const DAPP_ACCOUNTS_METHOD: &str = "parity_getDappsAddresses";
