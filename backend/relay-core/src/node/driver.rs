use crate::error::TransportError;
use crate::error::connection::ConnectionError;
use crate::node::{
    CallRoute, ConnectionEvent, ConnectionEventKind, LinkState, NodeCommand, SubscriberId,
};
use crate::proto::{Notification, SubscriptionId};

use common::{ErrorLocation, PairingToken};

use std::collections::HashMap;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, backoff::Backoff};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::sleep as TokioSleep;
use tokio::time::timeout as TokioTimeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const RECONNECT_MAX_INTERVAL: Duration = Duration::from_secs(30);

type NodeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(super) struct Driver {
    pub(super) url: Url,
    pub(super) token: PairingToken,
    pub(super) generation: u64,
    pub(super) events: mpsc::Sender<ConnectionEvent>,
    pub(super) commands: mpsc::Receiver<NodeCommand>,
    pub(super) link: Arc<LinkState>,
    pub(super) shutdown: Arc<Notify>,
}

pub(crate) struct PendingCall {
    pub(crate) caller_id: Value,
    pub(crate) route: CallRoute,
    pub(crate) reply: oneshot::Sender<Result<Value, TransportError>>,
}

/// Drop calls whose caller stopped waiting (its `execute_raw` timed out or was
/// cancelled). Returns how many were removed.
pub(crate) fn prune_abandoned(pending: &mut HashMap<u64, PendingCall>) -> usize {
    let before = pending.len();
    pending.retain(|_, call| !call.reply.is_closed());
    before - pending.len()
}

enum SocketEnd {
    Dropped,
    Shutdown,
}

enum Attempt {
    Connected(Box<NodeSocket>),
    Failed(ConnectionError),
    Shutdown,
}

/// Connect, serve, reconnect until shut down or the token is refused.
pub(super) async fn run(mut driver: Driver) {
    let mut backoff = ExponentialBackoff {
        initial_interval: RECONNECT_INITIAL_INTERVAL,
        max_interval: RECONNECT_MAX_INTERVAL,
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut next_wire_id: u64 = 1;

    loop {
        if driver.link.is_stopped() {
            break;
        }
        driver.link.mark_connecting();

        match driver.attempt().await {
            Attempt::Connected(socket) => {
                backoff.reset();
                driver.link.mark_connected();
                info!("Node connection #{} open", driver.generation);
                driver.emit(ConnectionEventKind::Open).await;

                let end = driver.serve(*socket, &mut next_wire_id).await;

                driver.link.mark_down();
                info!("Node connection #{} closed", driver.generation);
                driver.emit(ConnectionEventKind::Closed).await;

                if matches!(end, SocketEnd::Shutdown) {
                    break;
                }
            }
            Attempt::Failed(error) if error.is_unauthorized() => {
                warn!("Node refused the pairing token: {error}");
                driver.link.mark_down();
                driver.emit(ConnectionEventKind::Unauthorized).await;
                break;
            }
            Attempt::Failed(error) => {
                debug!("Node connect attempt failed: {error}");
            }
            Attempt::Shutdown => break,
        }

        driver.link.mark_down();
        let delay = backoff.next_backoff().unwrap_or(RECONNECT_MAX_INTERVAL);
        trace!("Reconnecting to node in {delay:?}");
        if !driver.idle(delay).await {
            break;
        }
    }

    driver.link.mark_down();
    debug!("Node connection #{} driver stopped", driver.generation);
}

impl Driver {
    async fn emit(&self, kind: ConnectionEventKind) {
        let event = ConnectionEvent {
            generation: self.generation,
            kind,
        };
        if self.events.send(event).await.is_err() {
            trace!("Connection event receiver gone");
        }
    }

    fn request(&self) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ConnectionError> {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token.as_str())).map_err(|e| {
            ConnectionError::Address {
                message: format!("token is not a valid header value: {e}"),
                location: ErrorLocation::from(Location::caller()),
            }
        })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }

    /// One connect attempt. Calls queued meanwhile fail fast.
    async fn attempt(&mut self) -> Attempt {
        let request = match self.request() {
            Ok(request) => request,
            Err(error) => return Attempt::Failed(error),
        };

        let connect = TokioTimeout(CONNECT_TIMEOUT, connect_async(request));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return Attempt::Shutdown,
                command = self.commands.recv() => match command {
                    Some(command) => reject(command),
                    None => return Attempt::Shutdown,
                },
                outcome = &mut connect => {
                    return match outcome {
                        Ok(Ok((socket, _))) => Attempt::Connected(Box::new(socket)),
                        Ok(Err(error)) => Attempt::Failed(ConnectionError::from(error)),
                        Err(_) => Attempt::Failed(ConnectionError::Timeout {
                            message: format!("no handshake within {CONNECT_TIMEOUT:?}"),
                            location: ErrorLocation::from(Location::caller()),
                        }),
                    };
                }
            }
        }
    }

    /// Wait out a reconnect delay. Returns false when the driver should stop.
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = TokioSleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => return false,
                command = self.commands.recv() => match command {
                    Some(command) => reject(command),
                    None => return false,
                },
                _ = &mut sleep => return true,
            }
        }
    }

    async fn serve(&mut self, socket: NodeSocket, next_wire_id: &mut u64) -> SocketEnd {
        let (mut sink, mut stream) = socket.split();
        let mut pending: HashMap<u64, PendingCall> = HashMap::new();
        let mut routes: HashMap<SubscriptionId, SubscriberId> = HashMap::new();

        let end = loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = sink.close().await;
                    break SocketEnd::Shutdown;
                }
                command = self.commands.recv() => {
                    let Some(NodeCommand::Call { mut payload, route, reply }) = command else {
                        let _ = sink.close().await;
                        break SocketEnd::Shutdown;
                    };

                    let Some(object) = payload.as_object_mut() else {
                        let _ = reply.send(Err(TransportError::malformed(
                            "JSON-RPC payload must be an object",
                        )));
                        continue;
                    };

                    let wire_id = *next_wire_id;
                    *next_wire_id += 1;
                    let caller_id = object.insert("id".to_string(), json!(wire_id)).unwrap_or(Value::Null);

                    trace!("-> node #{wire_id}: {payload}");
                    if let Err(e) = sink.send(Message::Text(payload.to_string().into())).await {
                        warn!("Failed to write to node socket: {e}");
                        let _ = reply.send(Err(TransportError::uninitialized(
                            "node connection lost while sending",
                        )));
                        break SocketEnd::Dropped;
                    }
                    let abandoned = prune_abandoned(&mut pending);
                    if abandoned > 0 {
                        debug!("Dropped {abandoned} node call(s) nobody is waiting for");
                    }
                    pending.insert(wire_id, PendingCall { caller_id, route, reply });
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(text.as_str(), &mut pending, &mut routes).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break SocketEnd::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Node socket error: {e}");
                        break SocketEnd::Dropped;
                    }
                },
            }
        };

        for (_, call) in pending.drain() {
            let _ = call.reply.send(Err(TransportError::uninitialized(
                "node connection closed before the response arrived",
            )));
        }
        end
    }

    async fn handle_frame(
        &self,
        text: &str,
        pending: &mut HashMap<u64, PendingCall>,
        routes: &mut HashMap<SubscriptionId, SubscriberId>,
    ) {
        trace!("<- node: {text}");
        let mut frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}", TransportError::malformed(format!("node frame: {e}")));
                return;
            }
        };

        if let Some(wire_id) = frame.get("id").and_then(Value::as_u64) {
            let Some(call) = pending.remove(&wire_id) else {
                warn!(
                    "{}",
                    TransportError::unexpected(format!("node response for unknown id {wire_id}"))
                );
                return;
            };

            let succeeded = frame.get("error").is_none_or(Value::is_null);
            if succeeded {
                match &call.route {
                    CallRoute::Plain => {}
                    CallRoute::Subscribe { subscriber } => {
                        match frame.get("result").and_then(SubscriptionId::from_value) {
                            Some(subscription) => {
                                debug!("Subscription {subscription} routed to port {subscriber}");
                                routes.insert(subscription, *subscriber);
                            }
                            None => warn!("Subscribe call returned no subscription id"),
                        }
                    }
                    CallRoute::Unsubscribe { subscription } => {
                        routes.remove(subscription);
                    }
                }
            }

            if let Some(object) = frame.as_object_mut() {
                object.insert("id".to_string(), call.caller_id);
            }
            let _ = call.reply.send(Ok(frame));
            return;
        }

        match parse_notification(&frame) {
            Some(notification) => {
                let subscriber = routes.get(&notification.subscription).copied();
                self.emit(ConnectionEventKind::Notification {
                    notification,
                    subscriber,
                })
                .await;
            }
            None => warn!(
                "{}",
                TransportError::malformed(format!("node frame is neither response nor notification: {text}"))
            ),
        }
    }
}

fn parse_notification(frame: &Value) -> Option<Notification> {
    let method = frame.get("method")?.as_str()?.to_string();
    let params = frame.get("params")?;
    let subscription = SubscriptionId::from_value(params.get("subscription")?)?;
    Some(Notification {
        subscription,
        method,
        result: params.get("result").cloned().unwrap_or(Value::Null),
    })
}

fn reject(command: NodeCommand) {
    let NodeCommand::Call { reply, .. } = command;
    let _ = reply.send(Err(TransportError::uninitialized(
        "node connection is not open",
    )));
}
