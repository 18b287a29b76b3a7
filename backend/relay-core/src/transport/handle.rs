use crate::error::TransportError;
use crate::pairing::PairingState;
use crate::proto::{AccountId, AccountsResponse, ErrorCode, PortMessage, PortRequest};
use crate::transport::session::TransportCommand;
use crate::transport::{ConnectionState, PortId, SessionView};

use common::PairingToken;

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Cloneable handle to the session transport actor.
///
/// All clones talk to the same actor. The actor stops once every handle and
/// every [`Port`] is dropped.
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::Sender<TransportCommand>,
    view: Arc<SessionView>,
}

impl TransportHandle {
    pub(crate) fn new(commands: mpsc::Sender<TransportCommand>, view: Arc<SessionView>) -> Self {
        Self { commands, view }
    }

    async fn send(&self, command: TransportCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::closed("session transport stopped"))
    }

    async fn ask<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> TransportCommand,
    ) -> Result<T, TransportError> {
        let (reply, answer) = oneshot::channel();
        self.send(command(reply)).await?;
        answer
            .await
            .map_err(|_| TransportError::closed("session transport dropped the reply"))
    }

    /// Attach a relay. Responses, notifications and status updates for it
    /// arrive on the returned port.
    pub async fn open_port(&self) -> Result<Port, TransportError> {
        let (id, inbound) = self.ask(|reply| TransportCommand::OpenPort { reply }).await?;
        Ok(Port {
            id,
            inbound,
            commands: self.commands.clone(),
        })
    }

    /// Account gate: cached accounts for `origin`, fetched on first use.
    ///
    /// Never fails; failures are carried in `err`.
    pub async fn request_accounts(&self, origin: &str) -> AccountsResponse {
        let origin = origin.to_string();
        match self
            .ask(|reply| TransportCommand::Accounts { origin, reply })
            .await
        {
            Ok(response) => response,
            Err(e) => AccountsResponse::failed(e.to_code()),
        }
    }

    /// Hand over a token received from the pairing UI. Fire-and-forget.
    pub async fn deliver_token(
        &self,
        token: PairingToken,
        session_seed: Option<String>,
    ) -> Result<(), TransportError> {
        self.send(TransportCommand::Token {
            token,
            session_seed,
        })
        .await
    }

    /// One call on the node connection, returning its `result`.
    pub async fn execute(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let method = method.to_string();
        self.ask(|reply| TransportCommand::Execute {
            method,
            params,
            reply,
        })
        .await?
    }

    /// Replace the node connection with one authenticated by `token`.
    pub async fn open(&self, token: PairingToken) -> Result<(), TransportError> {
        self.send(TransportCommand::Open { token }).await
    }

    /// Tear down the node connection. The accounts cache survives.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.ask(|reply| TransportCommand::Close { reply }).await
    }

    pub async fn status(&self) -> ConnectionState {
        self.view.status().await
    }

    /// `web3_clientVersion` of the connected node.
    pub async fn version(&self) -> Option<String> {
        self.view.version.read().await.clone()
    }

    pub async fn pairing_state(&self) -> PairingState {
        self.view.pairing.read().await.state
    }

    /// Consecutive failed UI probes.
    pub async fn retry_count(&self) -> u32 {
        self.view.pairing.read().await.retries
    }

    pub async fn session_seed(&self) -> Option<String> {
        self.view.session_seed.read().await.clone()
    }

    /// Current accounts cache contents.
    pub async fn accounts_snapshot(&self) -> Result<HashMap<String, Vec<AccountId>>, TransportError> {
        self.ask(|reply| TransportCommand::InspectCache { reply }).await
    }
}

/// A relay's attachment to the transport. Dropping it detaches the relay.
pub struct Port {
    id: PortId,
    inbound: mpsc::Receiver<PortMessage>,
    commands: mpsc::Sender<TransportCommand>,
}

impl Port {
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Forward a page request. The answer arrives through [`recv`](Self::recv).
    pub async fn forward(&self, request: PortRequest) -> Result<(), TransportError> {
        let id = request.id;
        self.commands
            .send(TransportCommand::Forward {
                port: self.id,
                request,
            })
            .await
            .map_err(|_| {
                trace!("Port {} forward of #{id} failed: transport gone", self.id);
                TransportError::from_code(&ErrorCode::Uninitialized)
            })
    }

    /// Next message for this port. `None` once the transport detached it.
    pub async fn recv(&mut self) -> Option<PortMessage> {
        self.inbound.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed() || self.inbound.is_closed()
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        let _ = self
            .commands
            .try_send(TransportCommand::ClosePort { port: self.id });
    }
}
