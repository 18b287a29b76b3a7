//! Test helpers for relay integration tests.
//!
//! - `MockNode`: scripted JSON-RPC node behind a bearer-token WebSocket
//! - `RecordingLauncher`: UI launcher that records instead of opening windows
//! - Builders for paired/unpaired transports and in-process pages

use relay_core::config::{ConfigStore, RelayConfig};
use relay_core::error::pairing::PairingError;
use relay_core::pairing::{UiLauncher, UiSurface};
use relay_core::provider::{PageProvider, ProviderOptions};
use relay_core::relay::Relay;
use relay_core::transport::{ConnectionState, TransportHandle, TransportOptions, spawn_transport};

use common::PairingToken;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use url::Url;

pub const NODE_TOKEN: &str = "node-secret-token";
pub const NODE_VERSION: &str = "MockNode/v1.0.0";
pub const DEFAULT_ACCOUNT: &str = "0x00a329c0648769a73afac7f9381e08fb43dbea72";
pub const PAGE_ORIGIN: &str = "https://dapp.example";
pub const CLIENT_ID: &str = "relay-test-client";
/// Nothing listens here; connects are refused immediately.
pub const UNREACHABLE_ADDRESS: &str = "127.0.0.1:1";

const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(10);
const EVENTUALLY_POLL: Duration = Duration::from_millis(20);

// ============================================
// MOCK NODE
// ============================================

#[derive(Clone)]
enum NodeSignal {
    DisconnectAll,
    Push(Value),
}

struct NodeState {
    token: String,
    calls: StdMutex<HashMap<String, usize>>,
    accounts: StdMutex<Vec<String>>,
    accounts_delay: StdMutex<Duration>,
    connections: AtomicUsize,
    rejected: AtomicUsize,
    next_subscription: AtomicU64,
    signals: broadcast::Sender<NodeSignal>,
}

/// Scripted node:
///
/// - `web3_clientVersion` -> [`NODE_VERSION`]
/// - `parity_getDappsAddresses` -> configured accounts (after optional delay)
/// - `eth_subscribe` -> `"0x<n>"`, followed by one notification
/// - `eth_unsubscribe` -> `true`
/// - `echo_id` -> the JSON-RPC id the node received
/// - `fail_method` -> JSON-RPC error "execution reverted"
/// - `slow_method` -> never answered
pub struct MockNode {
    addr: SocketAddr,
    state: Arc<NodeState>,
}

impl MockNode {
    pub async fn start() -> Self {
        Self::start_with_token(NODE_TOKEN).await
    }

    pub async fn start_with_token(token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock node");
        let addr = listener.local_addr().expect("mock node addr");
        let (signals, _) = broadcast::channel(16);

        let state = Arc::new(NodeState {
            token: token.to_string(),
            calls: StdMutex::new(HashMap::new()),
            accounts: StdMutex::new(vec![DEFAULT_ACCOUNT.to_string()]),
            accounts_delay: StdMutex::new(Duration::ZERO),
            connections: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            next_subscription: AtomicU64::new(1),
            signals,
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_node_connection(stream, Arc::clone(&accept_state)));
            }
        });

        Self { addr, state }
    }

    /// `host:port`, usable as `ui_address`.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .calls
            .lock()
            .expect("calls lock")
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// Successful WebSocket handshakes so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Handshakes refused for a wrong token.
    pub fn rejected(&self) -> usize {
        self.state.rejected.load(Ordering::SeqCst)
    }

    pub fn set_accounts(&self, accounts: &[&str]) {
        *self.state.accounts.lock().expect("accounts lock") =
            accounts.iter().map(|a| a.to_string()).collect();
    }

    pub fn set_accounts_delay(&self, delay: Duration) {
        *self.state.accounts_delay.lock().expect("delay lock") = delay;
    }

    /// Drop every open socket (clients see a connection loss).
    pub fn disconnect_all(&self) {
        let _ = self.state.signals.send(NodeSignal::DisconnectAll);
    }

    /// Push a subscription notification to every open socket.
    pub fn notify(&self, subscription: &str, result: Value) {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": { "subscription": subscription, "result": result },
        });
        let _ = self.state.signals.send(NodeSignal::Push(frame));
    }
}

async fn serve_node_connection(stream: TcpStream, state: Arc<NodeState>) {
    let expected = format!("Bearer {}", state.token);
    let callback = |request: &HsRequest, response: HsResponse| -> Result<HsResponse, ErrorResponse> {
        let authorized = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            == Some(expected.as_str());
        if authorized {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("bad token".to_string()));
            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
            Err(rejection)
        }
    };

    let socket = match accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(_) => {
            state.rejected.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let mut signals = state.signals.subscribe();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if write.send(Message::Text(frame.to_string().into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Ok(NodeSignal::DisconnectAll) | Err(_) => break,
                Ok(NodeSignal::Push(frame)) => {
                    let _ = out_tx.send(frame);
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    tokio::spawn(answer(request, Arc::clone(&state), out_tx.clone()));
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(out_tx);
    writer.abort();
}

async fn answer(request: Value, state: Arc<NodeState>, out: mpsc::UnboundedSender<Value>) {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    *state
        .calls
        .lock()
        .expect("calls lock")
        .entry(method.clone())
        .or_insert(0) += 1;

    let reply = |result: Value| json!({ "jsonrpc": "2.0", "id": id, "result": result });

    match method.as_str() {
        "web3_clientVersion" => {
            let _ = out.send(reply(json!(NODE_VERSION)));
        }
        "parity_getDappsAddresses" => {
            let delay = *state.accounts_delay.lock().expect("delay lock");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let accounts = state.accounts.lock().expect("accounts lock").clone();
            let _ = out.send(reply(json!(accounts)));
        }
        "eth_subscribe" => {
            let n = state.next_subscription.fetch_add(1, Ordering::SeqCst);
            let subscription = format!("0x{n:x}");
            let _ = out.send(reply(json!(subscription)));
            let _ = out.send(json!({
                "jsonrpc": "2.0",
                "method": "eth_subscription",
                "params": { "subscription": subscription, "result": { "number": "0x1" } },
            }));
        }
        "eth_unsubscribe" => {
            let _ = out.send(reply(json!(true)));
        }
        "echo_id" => {
            let _ = out.send(reply(id.clone()));
        }
        "fail_method" => {
            let _ = out.send(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32000, "message": "execution reverted" },
            }));
        }
        "slow_method" => {}
        _ => {
            let _ = out.send(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "method not found" },
            }));
        }
    }
}

// ============================================
// UI LAUNCHER
// ============================================

/// Records pairing URLs instead of opening a browser.
#[derive(Clone, Default)]
pub struct RecordingLauncher {
    opened: Arc<StdMutex<Vec<Url>>>,
    closed: Arc<AtomicUsize>,
}

impl RecordingLauncher {
    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().expect("opened lock").clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl UiLauncher for RecordingLauncher {
    fn open(&self, url: &Url) -> Result<Box<dyn UiSurface>, PairingError> {
        self.opened.lock().expect("opened lock").push(url.clone());
        Ok(Box::new(RecordingSurface {
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct RecordingSurface {
    closed: Arc<AtomicUsize>,
}

impl UiSurface for RecordingSurface {
    fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================
// BUILDERS
// ============================================

pub fn token(raw: &str) -> PairingToken {
    PairingToken::parse(raw).expect("valid token")
}

pub fn start_transport(config: RelayConfig) -> (TransportHandle, ConfigStore, RecordingLauncher) {
    let store = ConfigStore::in_memory(config);
    let launcher = RecordingLauncher::default();
    let transport = spawn_transport(TransportOptions {
        config: store.clone(),
        launcher: Arc::new(launcher.clone()),
        client_id: CLIENT_ID.to_string(),
    });
    (transport, store, launcher)
}

/// Transport already holding the node's token, connected.
pub async fn paired_transport(node: &MockNode) -> (TransportHandle, ConfigStore) {
    let (transport, store, _) = start_transport(RelayConfig {
        token: Some(token(NODE_TOKEN)),
        ui_address: node.address(),
        ..Default::default()
    });
    wait_connected(&transport).await;
    (transport, store)
}

/// Transport without token pointed at an address where nothing listens.
pub fn unpaired_transport() -> (TransportHandle, ConfigStore, RecordingLauncher) {
    start_transport(RelayConfig {
        ui_address: UNREACHABLE_ADDRESS.to_string(),
        ..Default::default()
    })
}

pub async fn wait_connected(transport: &TransportHandle) {
    eventually("transport connected", || async {
        transport.status().await == ConnectionState::Connected
    })
    .await;
}

/// In-process page: provider <-> relay <-> transport, no sockets.
pub fn page_on(transport: &TransportHandle, origin: &str, pairing_origin: &str) -> PageProvider {
    page_with_options(transport, origin, pairing_origin, ProviderOptions::default())
}

pub fn page_with_options(
    transport: &TransportHandle,
    origin: &str,
    pairing_origin: &str,
    options: ProviderOptions,
) -> PageProvider {
    let (page_tx, page_rx) = mpsc::channel(64);
    let (relay_tx, relay_rx) = mpsc::channel(64);
    let relay = Relay::new(origin, pairing_origin, transport.clone());
    tokio::spawn(relay.run(page_rx, relay_tx));
    PageProvider::new(page_tx, relay_rx, options)
}

/// Poll `check` until it holds, panicking after a generous timeout.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + EVENTUALLY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(EVENTUALLY_POLL).await;
    }
    panic!("timed out waiting for: {what}");
}
