//! Per-page forwarder between a page provider and the session transport.
//!
//! The relay has no RPC semantics. It appends the page origin to requests,
//! passes responses back untouched and derives a single UI signal from the
//! well-known `UNINITIALIZED` error code.

pub mod panel;
mod server;

pub use panel::PanelState;
pub use server::{RelayServerHandle, start_relay_server};

use crate::error::TransportError;
use crate::error::relay::RelayError;
use crate::proto::{
    ErrorCode, PageMessage, PortMessage, PortRequest, RelayMessage, RequestId,
    RequestKind, RpcResponse,
};
use crate::transport::{Port, TransportHandle};

use common::{ErrorLocation, PairingToken};

use std::future::pending;
use std::panic::Location;

use log::{debug, info, trace, warn};
use serde_json::Value;
use tokio::sync::mpsc;

pub struct Relay {
    origin: String,
    pairing_origin: String,
    transport: TransportHandle,
    port: Option<Port>,
    panel: PanelState,
}

impl Relay {
    /// `origin` is the page this relay serves; token deliveries are only
    /// accepted when it equals `pairing_origin`.
    pub fn new(
        origin: impl Into<String>,
        pairing_origin: impl Into<String>,
        transport: TransportHandle,
    ) -> Self {
        Self {
            origin: origin.into(),
            pairing_origin: pairing_origin.into(),
            transport,
            port: None,
            panel: PanelState::new(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Relay until the page side closes.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<PageMessage>,
        outbound: mpsc::Sender<RelayMessage>,
    ) -> Result<(), RelayError> {
        self.attach().await;

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.on_page_message(message, &outbound).await?,
                    None => break,
                },
                message = next_port_message(&mut self.port) => match message {
                    Some(message) => self.on_port_message(message, &outbound).await?,
                    None => {
                        warn!("Transport detached the relay for {}", self.origin);
                        self.port = None;
                    }
                },
            }
        }

        debug!("Relay for {} finished", self.origin);
        Ok(())
    }

    async fn attach(&mut self) -> Option<&Port> {
        let reusable = self.port.as_ref().is_some_and(|port| !port.is_closed());
        if !reusable {
            self.port = match self.transport.open_port().await {
                Ok(port) => {
                    trace!("Relay for {} attached as port {}", self.origin, port.id());
                    Some(port)
                }
                Err(e) => {
                    warn!("Relay for {} cannot attach: {e}", self.origin);
                    None
                }
            };
        }
        self.port.as_ref()
    }

    async fn on_page_message(
        &mut self,
        message: PageMessage,
        outbound: &mpsc::Sender<RelayMessage>,
    ) -> Result<(), RelayError> {
        match message {
            PageMessage::Request { id, payload, kind } => {
                if let Err(e) = self.forward(id, payload, kind).await {
                    debug!("Request #{id} from {} not forwarded: {e}", self.origin);
                    let failed = RpcResponse::failed(id, e.to_code());
                    self.on_port_message(PortMessage::Response(failed), outbound)
                        .await?;
                }
            }

            PageMessage::AccountsRequest { id } => {
                let transport = self.transport.clone();
                let origin = self.origin.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let response = transport.request_accounts(&origin).await;
                    if outbound
                        .send(RelayMessage::AccountsResponse { id, response })
                        .await
                        .is_err()
                    {
                        trace!("Page for {origin} left before its accounts arrived");
                    }
                });
            }

            PageMessage::Token {
                token,
                session_seed,
            } => self.deliver_token(token, session_seed).await,
        }
        Ok(())
    }

    async fn forward(
        &mut self,
        id: RequestId,
        payload: Value,
        kind: RequestKind,
    ) -> Result<(), TransportError> {
        let request = PortRequest {
            id,
            payload,
            kind,
            origin: self.origin.clone(),
        };
        match self.attach().await {
            Some(port) => port.forward(request).await,
            None => Err(TransportError::from_code(&ErrorCode::Uninitialized)),
        }
    }

    async fn deliver_token(&self, token: String, session_seed: Option<String>) {
        if self.origin != self.pairing_origin {
            warn!("Token message from {} ignored", self.origin);
            return;
        }

        match PairingToken::parse(&token) {
            Ok(token) => {
                info!("Relaying pairing token {} to transport", token.fingerprint());
                if let Err(e) = self.transport.deliver_token(token, session_seed).await {
                    warn!("Token not delivered: {e}");
                }
            }
            Err(e) => warn!("Rejected pairing token from {}: {e}", self.origin),
        }
    }

    async fn on_port_message(
        &mut self,
        message: PortMessage,
        outbound: &mpsc::Sender<RelayMessage>,
    ) -> Result<(), RelayError> {
        let panel = match &message {
            PortMessage::Response(response) => self.panel.on_response(response.err.as_ref()),
            _ => None,
        };

        send_to_page(outbound, RelayMessage::from(message)).await?;

        if let Some(visible) = panel {
            debug!(
                "Panel for {} {}",
                self.origin,
                if visible { "shown" } else { "hidden" }
            );
            send_to_page(outbound, RelayMessage::Panel { visible }).await?;
        }
        Ok(())
    }
}

async fn next_port_message(port: &mut Option<Port>) -> Option<PortMessage> {
    match port {
        Some(port) => port.recv().await,
        None => pending().await,
    }
}

async fn send_to_page(
    outbound: &mpsc::Sender<RelayMessage>,
    message: RelayMessage,
) -> Result<(), RelayError> {
    outbound.send(message).await.map_err(|_| RelayError::Send {
        message: "page channel closed".to_string(),
        location: ErrorLocation::from(Location::caller()),
    })
}
