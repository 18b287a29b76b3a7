use crate::config::{ConfigPatch, ConfigStore};
use crate::error::{CoreError, TransportError};
use crate::node::{CallRoute, ConnectionEvent, ConnectionEventKind, NodeConnection};
use crate::pairing::{
    PairingAction, PairingMachine, UiLauncher, UiSurface, pairing_url, probe_ui,
};
use crate::proto::{
    AccountId, AccountsResponse, ErrorCode, PortMessage, PortRequest, RequestKind, RpcResponse,
};
use crate::transport::accounts::{AccountsCache, AccountsLookup, AccountsReply};
use crate::transport::{
    PORT_CHANNEL_CAPACITY, PairingSnapshot, PortId, SessionView, TransportOptions,
};
use crate::{CLIENT_VERSION_METHOD, DAPP_ACCOUNTS_METHOD};

use common::PairingToken;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use serde_json::{Value, json};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep as TokioSleep;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Commands processed by the session transport actor.
pub(crate) enum TransportCommand {
    OpenPort {
        reply: oneshot::Sender<(PortId, mpsc::Receiver<PortMessage>)>,
    },
    ClosePort {
        port: PortId,
    },
    Forward {
        port: PortId,
        request: PortRequest,
    },
    Accounts {
        origin: String,
        reply: AccountsReply,
    },
    AccountsFetched {
        origin: String,
        epoch: u64,
        result: Result<Vec<AccountId>, TransportError>,
    },
    Token {
        token: PairingToken,
        session_seed: Option<String>,
    },
    Execute {
        method: String,
        params: Vec<Value>,
        reply: oneshot::Sender<Result<Value, TransportError>>,
    },
    Open {
        token: PairingToken,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    ProbeFinished {
        result: Result<(), TransportError>,
    },
    RetryFired,
    VersionFetched {
        generation: u64,
        result: Result<Value, TransportError>,
    },
    InspectCache {
        reply: oneshot::Sender<HashMap<String, Vec<AccountId>>>,
    },
}

/// Everything the actor owns. Never shared outside the actor task.
struct SessionState {
    config: ConfigStore,
    launcher: Arc<dyn UiLauncher>,
    client_id: String,
    http: reqwest::Client,
    view: Arc<SessionView>,
    commands: mpsc::WeakSender<TransportCommand>,
    events: mpsc::Sender<ConnectionEvent>,
    connection: Option<Arc<NodeConnection>>,
    generation: u64,
    pairing: PairingMachine,
    retry: Option<JoinHandle<()>>,
    surface: Option<Box<dyn UiSurface>>,
    accounts: AccountsCache,
    ports: HashMap<PortId, mpsc::Sender<PortMessage>>,
    next_port: PortId,
}

pub(crate) async fn run(
    options: TransportOptions,
    commands: mpsc::WeakSender<TransportCommand>,
    mut command_rx: mpsc::Receiver<TransportCommand>,
    view: Arc<SessionView>,
) {
    let (events, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let mut state = SessionState {
        config: options.config,
        launcher: options.launcher,
        client_id: options.client_id,
        http: reqwest::Client::new(),
        view,
        commands,
        events,
        connection: None,
        generation: 0,
        pairing: PairingMachine::new(),
        retry: None,
        surface: None,
        accounts: AccountsCache::new(),
        ports: HashMap::new(),
        next_port: 1,
    };

    info!("Session transport started");

    let stored = state.config.get().await;
    let actions = state.pairing.start(stored.token, stored.session_seed.clone());
    *state.view.session_seed.write().await = stored.session_seed;
    state.perform(actions).await;

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(command) => state.handle(command).await,
                None => break,
            },
            Some(event) = event_rx.recv() => state.on_event(event).await,
        }
    }

    state.shutdown();
    info!("Session transport stopped");
}

impl SessionState {
    fn live_connection(&self) -> Option<Arc<NodeConnection>> {
        self.connection
            .as_ref()
            .filter(|connection| connection.is_connected())
            .cloned()
    }

    /// Spawn `work` and post its outcome back to the actor.
    fn spawn_then<F>(&self, work: F)
    where
        F: Future<Output = TransportCommand> + Send + 'static,
    {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let command = work.await;
            match commands.upgrade() {
                Some(tx) => {
                    let _ = tx.send(command).await;
                }
                None => trace!("Session transport gone before task finished"),
            }
        });
    }

    async fn handle(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::OpenPort { reply } => {
                let id = self.next_port;
                self.next_port += 1;
                let (tx, rx) = mpsc::channel(PORT_CHANNEL_CAPACITY);
                self.ports.insert(id, tx);
                debug!("Port {id} attached ({} open)", self.ports.len());
                let _ = reply.send((id, rx));
            }

            TransportCommand::ClosePort { port } => {
                if self.ports.remove(&port).is_some() {
                    debug!("Port {port} detached ({} open)", self.ports.len());
                }
            }

            TransportCommand::Forward { port, request } => self.forward(port, request),

            TransportCommand::Accounts { origin, reply } => self.request_accounts(origin, reply),

            TransportCommand::AccountsFetched {
                origin,
                epoch,
                result,
            } => self.accounts.complete(&origin, epoch, result),

            TransportCommand::Token {
                token,
                session_seed,
            } => {
                info!("Pairing token {} delivered", token.fingerprint());
                let actions = self.pairing.on_token(token, session_seed);
                self.perform(actions).await;
            }

            TransportCommand::Execute {
                method,
                params,
                reply,
            } => match self.live_connection() {
                Some(connection) => {
                    tokio::spawn(async move {
                        let _ = reply.send(connection.execute(&method, params).await);
                    });
                }
                None => {
                    let _ = reply.send(Err(TransportError::uninitialized(format!(
                        "cannot call {method}: node connection is not open"
                    ))));
                }
            },

            TransportCommand::Open { token } => {
                self.perform(vec![
                    PairingAction::CloseConnection,
                    PairingAction::OpenConnection(token),
                ])
                .await;
            }

            TransportCommand::Close { reply } => {
                self.perform(vec![PairingAction::CloseConnection]).await;
                let _ = reply.send(());
            }

            TransportCommand::ProbeFinished { result } => {
                let actions = match result {
                    Ok(()) => self.pairing.on_ui_reachable(),
                    Err(e) => {
                        warn!("{e} (retry #{})", self.pairing.retries() + 1);
                        self.pairing.on_ui_unreachable()
                    }
                };
                self.perform(actions).await;
            }

            TransportCommand::RetryFired => {
                self.retry = None;
                let actions = self.pairing.on_retry_elapsed();
                self.perform(actions).await;
            }

            TransportCommand::VersionFetched { generation, result } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(version) => {
                        let version = match version {
                            Value::String(text) => text,
                            other => other.to_string(),
                        };
                        info!("Node version: {version}");
                        *self.view.version.write().await = Some(version);
                    }
                    Err(e) => warn!("Version probe failed: {e}"),
                }
            }

            TransportCommand::InspectCache { reply } => {
                let _ = reply.send(self.accounts.snapshot());
            }
        }

        self.publish_pairing().await;
    }

    fn forward(&mut self, port: PortId, request: PortRequest) {
        let Some(sender) = self.ports.get(&port).cloned() else {
            warn!("Request #{} from detached port {port} dropped", request.id);
            return;
        };

        let Some(connection) = self.live_connection() else {
            debug!(
                "Request #{} from {} rejected: node connection not open",
                request.id, request.origin
            );
            send_to_port(
                port,
                &sender,
                PortMessage::Response(RpcResponse::failed(request.id, ErrorCode::Uninitialized)),
            );
            return;
        };

        let route = match request.kind {
            RequestKind::Call => CallRoute::Plain,
            RequestKind::Subscribe => CallRoute::Subscribe { subscriber: port },
            RequestKind::Unsubscribe { subscription } => CallRoute::Unsubscribe { subscription },
        };
        let id = request.id;

        tokio::spawn(async move {
            let response = match connection.execute_raw(request.payload, route).await {
                Ok(payload) => RpcResponse::ok(id, payload),
                Err(e) => {
                    debug!("Request #{id} failed: {e}");
                    RpcResponse::failed(id, e.to_code())
                }
            };
            if sender.send(PortMessage::Response(response)).await.is_err() {
                debug!("Port {port} gone before response #{id}");
            }
        });
    }

    fn request_accounts(&mut self, origin: String, reply: AccountsReply) {
        let Some(connection) = self.live_connection() else {
            debug!("Accounts for {origin} requested while disconnected");
            let _ = reply.send(AccountsResponse::failed(ErrorCode::Uninitialized));
            return;
        };

        if let AccountsLookup::Fetch { epoch } = self.accounts.lookup(&origin, reply) {
            self.fetch_accounts(connection, origin, epoch);
        }
    }

    fn fetch_accounts(&self, connection: Arc<NodeConnection>, origin: String, epoch: u64) {
        debug!("Fetching accounts for {origin}");
        self.spawn_then(async move {
            let result = connection
                .execute(DAPP_ACCOUNTS_METHOD, vec![json!(origin)])
                .await
                .and_then(|value| {
                    serde_json::from_value::<Vec<AccountId>>(value).map_err(TransportError::from)
                });
            TransportCommand::AccountsFetched {
                origin,
                epoch,
                result,
            }
        });
    }

    async fn on_event(&mut self, event: ConnectionEvent) {
        if event.generation != self.generation {
            trace!("Ignoring event from replaced connection #{}", event.generation);
            return;
        }

        match event.kind {
            ConnectionEventKind::Open => {
                let actions = self.pairing.on_connection_opened();
                self.perform(actions).await;

                let (epoch, origins) = self.accounts.reset();
                if let Some(connection) = self.live_connection() {
                    for origin in origins {
                        self.fetch_accounts(Arc::clone(&connection), origin, epoch);
                    }

                    let generation = self.generation;
                    self.spawn_then(async move {
                        let result = connection.execute(CLIENT_VERSION_METHOD, Vec::new()).await;
                        TransportCommand::VersionFetched { generation, result }
                    });
                }

                self.broadcast_status(true);
            }

            ConnectionEventKind::Closed => {
                *self.view.version.write().await = None;
                self.broadcast_status(false);
            }

            ConnectionEventKind::Unauthorized => {
                let actions = self.pairing.on_token_rejected();
                self.perform(actions).await;
            }

            ConnectionEventKind::Notification {
                notification,
                subscriber,
            } => {
                let target = subscriber.and_then(|port| {
                    self.ports.get(&port).map(|sender| (port, sender.clone()))
                });
                match target {
                    Some((port, sender)) => {
                        send_to_port(port, &sender, PortMessage::Notification(notification));
                    }
                    None => warn!(
                        "{}",
                        TransportError::unexpected(format!(
                            "notification for unowned subscription {}",
                            notification.subscription
                        ))
                    ),
                }
            }
        }

        self.publish_pairing().await;
    }

    fn broadcast_status(&self, connected: bool) {
        for (port, sender) in &self.ports {
            send_to_port(*port, sender, PortMessage::Status { connected });
        }
    }

    async fn publish_pairing(&self) {
        let snapshot = PairingSnapshot {
            state: self.pairing.state(),
            retries: self.pairing.retries(),
        };
        *self.view.pairing.write().await = snapshot;
    }

    /// Execute pairing actions in order. Actions may produce follow-up actions.
    async fn perform(&mut self, actions: Vec<PairingAction>) {
        let mut queue: VecDeque<PairingAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            trace!("Pairing action {action:?}");
            match action {
                PairingAction::OpenConnection(token) => self.open_connection(token).await,

                PairingAction::CloseConnection => {
                    if let Some(connection) = self.connection.take() {
                        connection.close();
                        // The replacement bumps the generation, so this connection's
                        // own `Closed` event is dropped as stale.
                        *self.view.version.write().await = None;
                        self.broadcast_status(false);
                    }
                }

                PairingAction::ProbeUi => match self.config.get().await.ui_url() {
                    Ok(ui_url) => {
                        let http = self.http.clone();
                        self.spawn_then(async move {
                            TransportCommand::ProbeFinished {
                                result: probe_ui(&http, &ui_url).await,
                            }
                        });
                    }
                    Err(e) => {
                        error!("Cannot probe node UI: {e}");
                        queue.extend(self.pairing.on_ui_unreachable());
                    }
                },

                PairingAction::OpenUiSurface => match self.open_surface().await {
                    Ok(surface) => self.surface = Some(surface),
                    Err(e) => {
                        error!("Failed to open pairing UI: {e}");
                        queue.extend(self.pairing.on_surface_failed());
                    }
                },

                PairingAction::CloseUiSurface => {
                    if let Some(surface) = self.surface.take() {
                        surface.close();
                    }
                }

                PairingAction::PersistToken {
                    token,
                    session_seed,
                } => {
                    *self.view.session_seed.write().await = session_seed.clone();
                    if let Err(e) = self
                        .config
                        .set(ConfigPatch::pairing(token, session_seed))
                        .await
                    {
                        error!("Failed to persist pairing token: {e}");
                    }
                }

                PairingAction::ForgetToken => {
                    *self.view.session_seed.write().await = None;
                    if let Err(e) = self.config.set(ConfigPatch::forget_pairing()).await {
                        error!("Failed to forget pairing token: {e}");
                    }
                }

                PairingAction::ScheduleRetry(delay) => self.schedule_retry(delay),

                PairingAction::CancelRetry => {
                    if let Some(retry) = self.retry.take() {
                        debug!("Pending pairing retry cancelled");
                        retry.abort();
                    }
                }
            }
        }
    }

    async fn open_connection(&mut self, token: PairingToken) {
        if let Some(previous) = self.connection.take() {
            previous.close();
        }

        let url = match self.config.get().await.node_url() {
            Ok(url) => url,
            Err(e) => {
                error!("Cannot open node connection: {e}");
                return;
            }
        };

        self.generation += 1;
        let connection = NodeConnection::open(url, token, self.generation, self.events.clone());
        *self.view.link.write().await = Some(connection.link());
        self.connection = Some(Arc::new(connection));
    }

    async fn open_surface(&self) -> Result<Box<dyn UiSurface>, CoreError> {
        let ui_url = self.config.get().await.ui_url()?;
        let url = pairing_url(&ui_url, &self.client_id)?;
        Ok(self.launcher.open(&url)?)
    }

    fn schedule_retry(&mut self, delay: Duration) {
        if let Some(previous) = self.retry.take() {
            previous.abort();
        }

        debug!("Next pairing probe in {delay:?}");
        let commands = self.commands.clone();
        self.retry = Some(tokio::spawn(async move {
            TokioSleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(TransportCommand::RetryFired).await;
            }
        }));
    }

    fn shutdown(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
        if let Some(surface) = self.surface.take() {
            surface.close();
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

fn send_to_port(port: PortId, sender: &mpsc::Sender<PortMessage>, message: PortMessage) {
    match sender.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("Port {port} is not keeping up, message dropped"),
        Err(TrySendError::Closed(_)) => trace!("Port {port} already closed"),
    }
}
