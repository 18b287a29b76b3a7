//! Session transport: the privileged side of the relay.
//!
//! A single actor task owns the node connection, the pairing machine, the
//! accounts cache and the table of relay ports. Everything else holds a
//! [`TransportHandle`] and talks to the actor through commands.
//!
//! # Architecture
//!
//! - Commands sent via mpsc channel, processed one at a time
//! - Node calls and UI probes run in spawned tasks that post their outcome
//!   back as commands, so state only changes on the actor's turn
//! - Status, version and pairing progress are published through
//!   `Arc<RwLock<T>>` views for reads that never wait on the actor

pub mod accounts;
mod handle;
mod session;

pub use accounts::{AccountsCache, AccountsLookup};
pub use handle::{Port, TransportHandle};

use crate::config::ConfigStore;
use crate::node::{LinkState, SubscriberId};
use crate::pairing::{PairingState, UiLauncher};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc};

const COMMAND_CHANNEL_CAPACITY: usize = 256;
const PORT_CHANNEL_CAPACITY: usize = 256;

/// Identifies one relay attached to the transport.
pub type PortId = SubscriberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No connection was ever opened.
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PairingSnapshot {
    pub(crate) state: PairingState,
    pub(crate) retries: u32,
}

/// Read-only views published by the actor.
pub(crate) struct SessionView {
    pub(crate) link: RwLock<Option<Arc<LinkState>>>,
    pub(crate) version: RwLock<Option<String>>,
    pub(crate) pairing: RwLock<PairingSnapshot>,
    pub(crate) session_seed: RwLock<Option<String>>,
}

impl SessionView {
    fn new() -> Self {
        Self {
            link: RwLock::new(None),
            version: RwLock::new(None),
            pairing: RwLock::new(PairingSnapshot {
                state: PairingState::NoToken,
                retries: 0,
            }),
            session_seed: RwLock::new(None),
        }
    }

    /// Derived, never stored.
    pub(crate) async fn status(&self) -> ConnectionState {
        match self.link.read().await.as_ref() {
            None => ConnectionState::Uninitialized,
            Some(link) if link.is_connected() => ConnectionState::Connected,
            Some(link) if link.is_connecting() => ConnectionState::Connecting,
            Some(_) => ConnectionState::Disconnected,
        }
    }
}

/// Everything the transport needs from its host process.
pub struct TransportOptions {
    pub config: ConfigStore,
    pub launcher: Arc<dyn UiLauncher>,
    /// Identifies this relay to the node UI (`?from=` on the pairing URL).
    pub client_id: String,
}

/// Spawn the session transport actor and start pairing.
///
/// Must be called from within a tokio runtime.
pub fn spawn_transport(options: TransportOptions) -> TransportHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let view = Arc::new(SessionView::new());

    tokio::spawn(session::run(
        options,
        command_tx.downgrade(),
        command_rx,
        Arc::clone(&view),
    ));

    TransportHandle::new(command_tx, view)
}
