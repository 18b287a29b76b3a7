mod helpers;

mod config_store;
mod pairing;
mod provider;
mod relay;
mod transport;
