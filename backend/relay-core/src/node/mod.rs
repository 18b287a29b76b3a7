//! Single authenticated WebSocket connection to the local node.
//!
//! [`NodeConnection::open`] spawns a driver task that connects with
//! `Authorization: Bearer <token>`, reconnects with exponential backoff when
//! the socket drops, and reports lifecycle changes as [`ConnectionEvent`]s.
//!
//! The connection owns its own JSON-RPC id space: every outbound payload gets
//! a connection-unique `id`, and the caller's id is put back on the response.
//! Payloads relayed for many pages therefore never collide at the node.

pub(crate) mod driver;

use crate::error::TransportError;
use crate::proto::{Notification, SubscriptionId, rpc_call, rpc_result};

use common::PairingToken;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info};
use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::timeout as TokioTimeout;
use url::Url;

/// Window for a single node round-trip made through this connection.
pub const NODE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Who receives notifications for a subscription (a relay port id).
pub type SubscriberId = u64;

/// Routing side effect of a call, applied by the driver when the response
/// passes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRoute {
    Plain,
    /// On success the returned subscription id is routed to `subscriber`.
    Subscribe { subscriber: SubscriberId },
    /// On success the routing entry for `subscription` is dropped.
    Unsubscribe { subscription: SubscriptionId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    /// Value passed to [`NodeConnection::open`]; lets the owner ignore events
    /// from a connection it already replaced.
    pub generation: u64,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEventKind {
    Open,
    Closed,
    /// Node refused the token during the handshake. The driver has stopped.
    Unauthorized,
    Notification {
        notification: Notification,
        subscriber: Option<SubscriberId>,
    },
}

/// Connection flags read by `status` without a round-trip to the driver.
#[derive(Debug, Default)]
pub struct LinkState {
    connected: AtomicBool,
    connecting: AtomicBool,
    stopped: AtomicBool,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn mark_connecting(&self) {
        if !self.is_stopped() {
            self.connecting.store(true, Ordering::SeqCst);
        }
    }

    fn mark_connected(&self) {
        self.connecting.store(false, Ordering::SeqCst);
        if !self.is_stopped() {
            self.connected.store(true, Ordering::SeqCst);
        }
    }

    fn mark_down(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.mark_down();
    }
}

enum NodeCommand {
    Call {
        payload: Value,
        route: CallRoute,
        reply: oneshot::Sender<Result<Value, TransportError>>,
    },
}

/// Handle to the node connection driver. Dropping it stops the driver.
pub struct NodeConnection {
    commands: mpsc::Sender<NodeCommand>,
    link: Arc<LinkState>,
    shutdown: Arc<Notify>,
    generation: u64,
}

impl NodeConnection {
    /// Spawn the driver for `url`. Returns immediately; the outcome of the
    /// first connect arrives as [`ConnectionEventKind::Open`] (or `Unauthorized`).
    pub fn open(
        url: Url,
        token: PairingToken,
        generation: u64,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let link = Arc::new(LinkState::default());
        let shutdown = Arc::new(Notify::new());

        info!(
            "Opening node connection #{generation} to {url} (token {})",
            token.fingerprint()
        );

        tokio::spawn(driver::run(driver::Driver {
            url,
            token,
            generation,
            events,
            commands: command_rx,
            link: Arc::clone(&link),
            shutdown: Arc::clone(&shutdown),
        }));

        Self {
            commands,
            link,
            shutdown,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.link.is_connecting()
    }

    /// Shared flags, readable after this handle is gone.
    pub fn link(&self) -> Arc<LinkState> {
        Arc::clone(&self.link)
    }

    /// Send one JSON-RPC object and wait for the node's response object.
    ///
    /// The response carries the caller's original `id`. Fails with
    /// `Uninitialized` when the socket is not open, without touching the node.
    pub async fn execute_raw(
        &self,
        payload: Value,
        route: CallRoute,
    ) -> Result<Value, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::uninitialized("node connection is not open"));
        }

        let caller_id = payload.get("id").and_then(Value::as_u64).unwrap_or_default();
        let (reply, response) = oneshot::channel();

        self.commands
            .send(NodeCommand::Call {
                payload,
                route,
                reply,
            })
            .await
            .map_err(|_| TransportError::uninitialized("node connection driver stopped"))?;

        match TokioTimeout(NODE_CALL_TIMEOUT, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::uninitialized(
                "node connection dropped the call",
            )),
            Err(_) => Err(TransportError::timeout(caller_id, NODE_CALL_TIMEOUT)),
        }
    }

    /// Call `method` and return its `result`, or the node's error as `Rpc`.
    pub async fn execute(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        debug!("Node call {method}");
        let response = self.execute_raw(rpc_call(0, method, params), CallRoute::Plain).await?;
        rpc_result(response)
    }

    /// Stop the driver. In-flight calls fail with `Uninitialized`.
    pub fn close(&self) {
        info!("Closing node connection #{}", self.generation);
        self.link.stop();
        self.shutdown.notify_one();
    }
}
