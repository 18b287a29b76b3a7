//! Relay WebSocket server.
//!
//! Each accepted WebSocket is one page load: it gets its own [`Relay`] and
//! its own transport port.
//!
//! # Security
//!
//! - Rejects non-loopback peers before the handshake
//! - The `Origin` header is captured during the upgrade; a request without
//!   one is refused with 403
//! - Nothing is served while `integration_enabled` is off

use crate::config::ConfigStore;
use crate::error::relay::RelayError;
use crate::proto::{PageMessage, RelayMessage, decode, encode};
use crate::relay::Relay;
use crate::transport::TransportHandle;

use common::ErrorLocation;

use std::net::SocketAddr;
use std::panic::Location;
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn as TokioSpawn;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use uuid::Uuid;

const PAGE_CHANNEL_CAPACITY: usize = 64;

/// Handle to a running relay server. Dropping it does not stop the server;
/// call [`shutdown`](Self::shutdown).
pub struct RelayServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl RelayServerHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new pages. Relays already running finish on their own.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Starts the relay WebSocket server on `addr`.
///
/// # Errors
///
/// Returns [`RelayError::Io`] if the address cannot be bound.
pub async fn start_relay_server(
    addr: SocketAddr,
    transport: TransportHandle,
    config: ConfigStore,
) -> Result<RelayServerHandle, RelayError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let shutdown = Arc::new(Notify::new());

    info!("Relay server listening on {local_addr}");

    let stop = Arc::clone(&shutdown);
    TokioSpawn(async move {
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let transport = transport.clone();
                        let config = config.clone();
                        TokioSpawn(async move {
                            if let Err(e) = handle_connection(stream, peer, transport, config).await {
                                error!("Relay connection from {peer} failed: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {e}"),
                },
            }
        }
        info!("Relay server on {local_addr} stopped");
    });

    Ok(RelayServerHandle {
        local_addr,
        shutdown,
    })
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    transport: TransportHandle,
    config: ConfigStore,
) -> Result<(), RelayError> {
    if !peer.ip().is_loopback() {
        warn!("Rejected non-loopback connection from {peer}");
        return Ok(());
    }

    let settings = config.get().await;
    if !settings.integration_enabled {
        debug!("Integration disabled, dropping page connection from {peer}");
        return Ok(());
    }
    let pairing_origin = settings.ui_origin().map_err(|e| RelayError::Handshake {
        message: format!("pairing origin unavailable: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let connection_id = Uuid::new_v4();
    let captured_origin: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));
    let captured = Arc::clone(&captured_origin);

    let callback =
        move |request: &HsRequest, response: HsResponse| -> Result<HsResponse, ErrorResponse> {
            let origin = request
                .headers()
                .get(ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            match origin {
                Some(origin) => {
                    if let Ok(mut guard) = captured.lock() {
                        *guard = Some(origin);
                    }
                    Ok(response)
                }
                None => {
                    let mut rejection = ErrorResponse::new(Some("Origin header required".to_string()));
                    *rejection.status_mut() = StatusCode::FORBIDDEN;
                    Err(rejection)
                }
            }
        };

    let socket = accept_hdr_async(stream, callback)
        .await
        .map_err(|e| RelayError::Handshake {
            message: format!("WebSocket handshake with {peer} failed: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

    let origin = captured_origin
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
        .ok_or_else(|| RelayError::Handshake {
            message: "origin missing after handshake".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

    info!("Page {connection_id} connected from {origin}");

    let (mut write, mut read) = socket.split();
    let (page_tx, page_rx) = mpsc::channel::<PageMessage>(PAGE_CHANNEL_CAPACITY);
    let (relay_tx, mut relay_rx) = mpsc::channel::<RelayMessage>(PAGE_CHANNEL_CAPACITY);

    let writer = TokioSpawn(async move {
        while let Some(message) = relay_rx.recv().await {
            let text = match encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode relay message: {e}");
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text.into())).await {
                debug!("Page {connection_id} write failed: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    let reader = TokioSpawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match decode::<PageMessage>(text.as_str()) {
                    Ok(message) => {
                        trace!("Page {connection_id} -> {message:?}");
                        if page_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Page {connection_id}: {e}"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Page {connection_id} read failed: {e}");
                    break;
                }
            }
        }
    });

    let outcome = Relay::new(origin, pairing_origin, transport)
        .run(page_rx, relay_tx)
        .await;

    reader.abort();
    let _ = writer.await;
    info!("Page {connection_id} disconnected");
    outcome
}
