//! Wires config, session transport and relay server into one process.

use crate::error::RelayDaemonError;
use crate::settings::Settings;

use relay_core::config::{ConfigStore, RelayConfig, resolve_config_dir};
use relay_core::pairing::ProcessLauncher;
use relay_core::relay::{RelayServerHandle, start_relay_server};
use relay_core::transport::{TransportHandle, TransportOptions, spawn_transport};

use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};

/// A running relay: transport actor plus the page-facing server.
pub struct RelayDaemon {
    server: RelayServerHandle,
    transport: TransportHandle,
    config: ConfigStore,
}

impl RelayDaemon {
    /// Load config, start pairing/connecting and begin serving pages.
    ///
    /// # Errors
    ///
    /// Fails if the config is corrupt, the opener is empty or the listen
    /// address cannot be bound.
    pub async fn start(settings: Settings) -> Result<Self, RelayDaemonError> {
        let config_dir = resolve_config_dir(settings.config_dir.clone())?;
        let mut config = RelayConfig::load(&config_dir)?;
        if let Some(ui_address) = settings.ui_address {
            info!("UI address overridden from environment: {ui_address}");
            config.ui_address = ui_address;
            config.validate()?;
        }
        info!(
            "Node UI at {} (integration {})",
            config.ui_address,
            if config.integration_enabled { "enabled" } else { "disabled" }
        );

        let launcher = ProcessLauncher::from_command_line(&settings.opener).ok_or_else(|| {
            RelayDaemonError::settings("UI opener command is empty")
        })?;
        info!("Pairing UI opener: {}", launcher.program());

        let config = ConfigStore::new(config_dir, config);
        let transport = spawn_transport(TransportOptions {
            config: config.clone(),
            launcher: Arc::new(launcher),
            client_id: settings.client_id,
        });

        let server = start_relay_server(settings.listen, transport.clone(), config.clone()).await?;

        Ok(Self {
            server,
            transport,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Stop serving pages and close the node connection.
    pub async fn shutdown(self) {
        info!("Relay daemon shutting down");
        self.server.shutdown();
        if let Err(e) = self.transport.close().await {
            warn!("Transport already stopped: {e}");
        }
    }
}
