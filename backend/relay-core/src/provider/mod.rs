//! Page-side RPC client.
//!
//! [`PageProvider`] assigns request ids, keeps the correlation table and the
//! subscription table, and resolves each caller exactly once: with the
//! matching response, with a timeout, or with `Uninitialized` when the relay
//! goes away.
//!
//! It speaks [`PageMessage`]/[`RelayMessage`] over a pair of channels, so it
//! runs the same over a WebSocket ([`PageProvider::connect`]) or wired
//! straight to an in-process [`Relay`](crate::relay::Relay).

pub mod subscription;

pub use subscription::{NotificationCallback, SubscriptionApi, SubscriptionMethods};

use crate::error::TransportError;
use crate::error::connection::ConnectionError;
use crate::pairing::RetrySchedule;
use crate::proto::{
    AccountId, AccountsResponse, ErrorCode, Notification, PageMessage, RelayMessage, RequestId,
    RequestKind, RpcResponse, SubscriptionId, decode, encode, rpc_call, rpc_result,
};
use subscription::Subscription;

use common::ErrorLocation;

use std::collections::HashMap;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep as TokioSleep;
use tokio::time::timeout as TokioTimeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Window after which an unanswered request fails with `RequestTimeout`.
    pub request_timeout: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct PendingRequest {
    reply: oneshot::Sender<Result<Value, TransportError>>,
    issued_at: Instant,
    /// Rejects the entry once the window passes, whether or not the caller still waits.
    timer: JoinHandle<()>,
    /// Set for subscribe calls: registered before the caller is resolved.
    subscribe: Option<(SubscriptionMethods, NotificationCallback)>,
}

type CloseListener = Box<dyn Fn() + Send + Sync>;

struct Shared {
    options: ProviderOptions,
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    connected: AtomicBool,
    relay_closed: AtomicBool,
    panel_visible: AtomicBool,
    close_listeners: Mutex<Vec<CloseListener>>,
    accounts: Mutex<Option<Vec<AccountId>>>,
    accounts_waiters: Mutex<HashMap<RequestId, oneshot::Sender<AccountsResponse>>>,
}

/// Page-facing RPC surface. Clones share one correlation table.
#[derive(Clone)]
pub struct PageProvider {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<PageMessage>,
}

impl PageProvider {
    /// Provider over an existing relay channel pair.
    ///
    /// Must be called from within a tokio runtime (spawns the reader).
    pub fn new(
        outbound: mpsc::Sender<PageMessage>,
        inbound: mpsc::Receiver<RelayMessage>,
        options: ProviderOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            options,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            relay_closed: AtomicBool::new(false),
            panel_visible: AtomicBool::new(false),
            close_listeners: Mutex::new(Vec::new()),
            accounts: Mutex::new(None),
            accounts_waiters: Mutex::new(HashMap::new()),
        });

        tokio::spawn(read_relay(Arc::clone(&shared), inbound));

        Self { shared, outbound }
    }

    /// Connect to a relay server, presenting `origin` as the page origin.
    pub async fn connect(
        url: &Url,
        origin: &str,
        options: ProviderOptions,
    ) -> Result<Self, ConnectionError> {
        let mut request = url.as_str().into_client_request()?;
        let origin = HeaderValue::from_str(origin).map_err(|e| ConnectionError::Address {
            message: format!("invalid origin '{origin}': {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;
        request.headers_mut().insert(ORIGIN, origin);

        let (socket, _) = connect_async(request).await?;
        let (mut write, mut read) = socket.split();
        info!("Page provider connected to relay at {url}");

        let (page_tx, mut page_rx) = mpsc::channel::<PageMessage>(CHANNEL_CAPACITY);
        let (relay_tx, relay_rx) = mpsc::channel::<RelayMessage>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = page_rx.recv().await {
                let text = match encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unencodable page message: {e}");
                        continue;
                    }
                };
                if write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(Ok(frame)) = read.next().await {
                match frame {
                    Message::Text(text) => match decode::<RelayMessage>(text.as_str()) {
                        Ok(message) => {
                            if relay_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("{e}"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            debug!("Relay socket closed");
        });

        Ok(Self::new(page_tx, relay_rx, options))
    }

    /// Last connection state reported by the relay.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Whether the relay currently shows its UI panel for this page.
    pub fn panel_visible(&self) -> bool {
        self.shared.panel_visible.load(Ordering::SeqCst)
    }

    /// Called once each time the connection goes from connected to not.
    pub async fn on_close(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared
            .close_listeners
            .lock()
            .await
            .push(Box::new(listener));
    }

    /// Number of requests still waiting for an answer.
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.shared.subscriptions.lock().await.len()
    }

    /// Call `method` and return its `result`.
    pub async fn execute(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let response = self
            .request(
                |id| rpc_call(id, method, params),
                RequestKind::Call,
                None,
            )
            .await?;
        rpc_result(response)
    }

    /// Send a raw JSON-RPC object and return the raw response object.
    ///
    /// The payload's `id` is replaced with the provider's correlation id.
    pub async fn send(&self, payload: Value) -> Result<Value, TransportError> {
        if !payload.is_object() {
            return Err(TransportError::malformed(
                "JSON-RPC payload must be an object",
            ));
        }

        self.request(
            |id| {
                let mut payload = payload;
                payload["id"] = json!(id);
                payload
            },
            RequestKind::Call,
            None,
        )
        .await
    }

    /// Subscribe through `api`; `callback` receives every notification result.
    pub async fn subscribe(
        &self,
        api: impl Into<SubscriptionApi>,
        callback: impl Fn(Value) + Send + Sync + 'static,
        params: Vec<Value>,
    ) -> Result<SubscriptionId, TransportError> {
        let methods = api.into().methods();
        let subscribe = methods.subscribe.clone();
        let callback: NotificationCallback = Arc::new(callback);

        let response = self
            .request(
                |id| rpc_call(id, &subscribe, params),
                RequestKind::Subscribe,
                Some((methods, callback)),
            )
            .await?;

        let result = rpc_result(response)?;
        SubscriptionId::from_value(&result).ok_or_else(|| {
            TransportError::malformed(format!("{subscribe} returned no subscription id: {result}"))
        })
    }

    /// Cancel a subscription. Unknown ids resolve to `false` with no effect.
    ///
    /// The local registration is removed only after the node confirmed.
    pub async fn unsubscribe(&self, subscription: &SubscriptionId) -> Result<bool, TransportError> {
        let unsubscribe = match self.shared.subscriptions.lock().await.get(subscription) {
            Some(registered) => registered.methods.unsubscribe.clone(),
            None => return Ok(false),
        };

        let response = self
            .request(
                |id| rpc_call(id, &unsubscribe, vec![subscription.to_value()]),
                RequestKind::Unsubscribe {
                    subscription: subscription.clone(),
                },
                None,
            )
            .await?;
        let done = rpc_result(response)?;

        self.shared.subscriptions.lock().await.remove(subscription);
        debug!("Unsubscribed {subscription}");
        Ok(done.as_bool().unwrap_or(true))
    }

    /// Cached accounts for this page, fetched on first use.
    pub async fn accounts(&self) -> Result<Vec<AccountId>, TransportError> {
        if let Some(cached) = self.shared.accounts.lock().await.clone() {
            return Ok(cached);
        }
        self.refresh_accounts().await
    }

    /// Ask the relay for this page's accounts and cache the answer.
    pub async fn refresh_accounts(&self) -> Result<Vec<AccountId>, TransportError> {
        if self.shared.relay_closed.load(Ordering::SeqCst) {
            return Err(TransportError::uninitialized("relay channel closed"));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, answer) = oneshot::channel();
        self.shared.accounts_waiters.lock().await.insert(id, reply);

        if self
            .outbound
            .send(PageMessage::AccountsRequest { id })
            .await
            .is_err()
        {
            self.shared.accounts_waiters.lock().await.remove(&id);
            return Err(TransportError::uninitialized("relay channel closed"));
        }

        let window = self.shared.options.request_timeout;
        let response = match TokioTimeout(window, answer).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(TransportError::uninitialized("relay channel closed")),
            Err(_) => {
                self.shared.accounts_waiters.lock().await.remove(&id);
                return Err(TransportError::timeout(id, window));
            }
        };

        match (response.err, response.payload) {
            (Some(code), _) => Err(TransportError::from_code(&code)),
            (None, accounts) => {
                let accounts = accounts.unwrap_or_default();
                *self.shared.accounts.lock().await = Some(accounts.clone());
                Ok(accounts)
            }
        }
    }

    /// Keep asking for accounts until the relay answers without error,
    /// waiting [`retry_timeout`](crate::pairing::retry_timeout) between tries.
    pub async fn accounts_with_retry(&self) -> Vec<AccountId> {
        let mut schedule = RetrySchedule::new();
        loop {
            match self.refresh_accounts().await {
                Ok(accounts) => return accounts,
                Err(e) => {
                    let delay = schedule.next_backoff().unwrap_or(DEFAULT_REQUEST_TIMEOUT);
                    debug!("Accounts not available ({e}), retry #{} in {delay:?}", schedule.retries());
                    TokioSleep(delay).await;
                }
            }
        }
    }

    /// First cached account, the page's default sender.
    pub async fn coinbase(&self) -> Option<AccountId> {
        self.shared
            .accounts
            .lock()
            .await
            .as_ref()
            .and_then(|accounts| accounts.first().cloned())
    }

    async fn request(
        &self,
        build: impl FnOnce(RequestId) -> Value,
        kind: RequestKind,
        subscribe: Option<(SubscriptionMethods, NotificationCallback)>,
    ) -> Result<Value, TransportError> {
        if self.shared.relay_closed.load(Ordering::SeqCst) {
            return Err(TransportError::uninitialized("relay channel closed"));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = build(id);
        let (reply, answer) = oneshot::channel();
        let window = self.shared.options.request_timeout;

        {
            // Held across the spawn so the timer cannot look before the insert.
            let mut pending = self.shared.pending.lock().await;
            let timer = tokio::spawn(expire_request(Arc::clone(&self.shared), id, window));
            pending.insert(
                id,
                PendingRequest {
                    reply,
                    issued_at: Instant::now(),
                    timer,
                    subscribe,
                },
            );
        }

        trace!("Request #{id} issued");
        if self
            .outbound
            .send(PageMessage::Request { id, payload, kind })
            .await
            .is_err()
        {
            if let Some(request) = self.shared.pending.lock().await.remove(&id) {
                request.timer.abort();
            }
            return Err(TransportError::uninitialized("relay channel closed"));
        }

        answer
            .await
            .unwrap_or_else(|_| Err(TransportError::uninitialized("provider reader stopped")))
    }
}

/// Per-request timer: rejects `id` with `RequestTimeout` if it is still pending.
async fn expire_request(shared: Arc<Shared>, id: RequestId, window: Duration) {
    TokioSleep(window).await;
    if let Some(request) = shared.pending.lock().await.remove(&id) {
        debug!("Request #{id} timed out after {window:?}");
        let _ = request.reply.send(Err(TransportError::timeout(id, window)));
    }
}

/// Reader task: resolves pending requests and dispatches notifications.
async fn read_relay(shared: Arc<Shared>, mut inbound: mpsc::Receiver<RelayMessage>) {
    while let Some(message) = inbound.recv().await {
        match message {
            RelayMessage::Response(response) => on_response(&shared, response).await,
            RelayMessage::Notification(notification) => on_notification(&shared, notification).await,
            RelayMessage::Status { connected } => set_connected(&shared, connected).await,
            RelayMessage::AccountsResponse { id, response } => {
                match shared.accounts_waiters.lock().await.remove(&id) {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => warn!(
                        "{}",
                        TransportError::unexpected(format!(
                            "accounts response for unknown request #{id}"
                        ))
                    ),
                }
            }
            RelayMessage::Panel { visible } => {
                shared.panel_visible.store(visible, Ordering::SeqCst);
            }
        }
    }

    info!("Relay channel closed");
    shared.relay_closed.store(true, Ordering::SeqCst);

    let pending: Vec<PendingRequest> = shared.pending.lock().await.drain().map(|(_, p)| p).collect();
    for request in pending {
        request.timer.abort();
        let _ = request
            .reply
            .send(Err(TransportError::uninitialized("relay channel closed")));
    }
    shared.accounts_waiters.lock().await.clear();
    set_connected(&shared, false).await;
}

async fn on_response(shared: &Shared, response: RpcResponse) {
    let RpcResponse { id, err, payload } = response;

    let Some(request) = shared.pending.lock().await.remove(&id) else {
        warn!(
            "{}",
            TransportError::unexpected(format!("response for unknown request #{id}"))
        );
        return;
    };
    request.timer.abort();
    trace!("Request #{id} answered in {:?}", request.issued_at.elapsed());

    let outcome = match err {
        Some(code) => {
            if code == ErrorCode::Uninitialized {
                set_connected(shared, false).await;
            }
            Err(TransportError::from_code(&code))
        }
        None => {
            set_connected(shared, true).await;
            Ok(payload.unwrap_or(Value::Null))
        }
    };

    if let (Ok(payload), Some((methods, callback))) = (&outcome, request.subscribe) {
        let subscription = payload
            .get("result")
            .filter(|_| payload.get("error").is_none_or(Value::is_null))
            .and_then(SubscriptionId::from_value);
        if let Some(id) = subscription {
            debug!("Subscription {id} registered via {}", methods.subscribe);
            shared.subscriptions.lock().await.insert(
                id.clone(),
                Subscription {
                    id,
                    methods,
                    callback,
                },
            );
        }
    }

    let _ = request.reply.send(outcome);
}

async fn on_notification(shared: &Shared, notification: Notification) {
    let registered = shared
        .subscriptions
        .lock()
        .await
        .get(&notification.subscription)
        .cloned();

    match registered {
        Some(subscription) => {
            if notification.method != subscription.methods.subscription {
                trace!(
                    "Notification for {} arrived as {}",
                    subscription.id, notification.method
                );
            }
            (subscription.callback)(notification.result);
        }
        None => trace!(
            "Dropping notification for unknown subscription {}",
            notification.subscription
        ),
    }
}

async fn set_connected(shared: &Shared, connected: bool) {
    let was_connected = shared.connected.swap(connected, Ordering::SeqCst);
    if !was_connected || connected {
        return;
    }

    let purged = {
        let mut subscriptions = shared.subscriptions.lock().await;
        let count = subscriptions.len();
        subscriptions.clear();
        count
    };
    info!("Connection lost, {purged} subscription(s) invalidated");

    for listener in shared.close_listeners.lock().await.iter() {
        listener();
    }
}
