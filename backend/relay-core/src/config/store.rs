//! Config store using actor pattern.
//!
//! The external key-value collaborator of the session transport: `get()`
//! returns a snapshot, `set(patch)` merges and persists.
//!
//! # Architecture
//!
//! - Commands sent via mpsc channel
//! - Dedicated task processes commands sequentially
//! - Reads use Arc<RwLock<T>> for concurrent access
//!
//! Memory is updated before the disk write, so a failing disk never loses a
//! freshly delivered token for the running session.

use crate::config::{ConfigPatch, RelayConfig};
use crate::error::config::ConfigError;

use common::ErrorLocation;

use std::panic::Location;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

/// Commands that mutate config state.
#[derive(Debug)]
pub enum ConfigCommand {
    /// Merge a patch, then persist (if the store is backed by a directory).
    Merge {
        patch: ConfigPatch,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
}

/// Config store shared by the daemon, the transport and the relay server.
///
/// This type is `Clone` and can be shared across tasks. All clones share the
/// same underlying state.
#[derive(Clone)]
pub struct ConfigStore {
    /// Channel to send config mutation commands
    command_tx: Arc<Mutex<Option<mpsc::Sender<ConfigCommand>>>>,

    /// Shared read-only access to the current config
    config: Arc<RwLock<RelayConfig>>,

    /// Directory for config.json, `None` keeps everything in memory
    config_dir: Arc<Option<PathBuf>>,

    /// Track if actor initialized
    actor_init: Arc<Mutex<bool>>,
}

impl ConfigStore {
    /// Store backed by `{config_dir}/config.json`.
    pub fn new(config_dir: PathBuf, config: RelayConfig) -> Self {
        Self::build(Some(config_dir), config)
    }

    /// Store that never touches the disk.
    pub fn in_memory(config: RelayConfig) -> Self {
        Self::build(None, config)
    }

    fn build(config_dir: Option<PathBuf>, config: RelayConfig) -> Self {
        Self {
            command_tx: Arc::new(Mutex::new(None)),
            config: Arc::new(RwLock::new(config)),
            config_dir: Arc::new(config_dir),
            actor_init: Arc::new(Mutex::new(false)),
        }
    }

    /// Current config snapshot.
    pub async fn get(&self) -> RelayConfig {
        self.config.read().await.clone()
    }

    /// Merge `patch` into the config and persist it.
    ///
    /// Resolves once the merge is visible to [`get`](Self::get). A disk
    /// failure is returned but the in-memory merge stays applied.
    pub async fn set(&self, patch: ConfigPatch) -> Result<(), ConfigError> {
        self.ensure_actor().await;

        let (reply, done) = oneshot::channel();
        {
            let tx_guard = self.command_tx.lock().await;
            let tx = tx_guard
                .as_ref()
                .ok_or_else(|| ConfigError::StoreUnavailable {
                    location: ErrorLocation::from(Location::caller()),
                    reason: "Config actor not initialized".to_string(),
                })?;

            tx.send(ConfigCommand::Merge { patch, reply })
                .await
                .map_err(|e| ConfigError::StoreUnavailable {
                    location: ErrorLocation::from(Location::caller()),
                    reason: format!("Config actor died: {}", e),
                })?;
        }

        done.await.map_err(|e| ConfigError::StoreUnavailable {
            location: ErrorLocation::from(Location::caller()),
            reason: format!("Config actor dropped reply: {}", e),
        })?
    }

    /// Ensure actor is spawned (lazy init).
    async fn ensure_actor(&self) {
        let mut init_guard = self.actor_init.lock().await;
        if !*init_guard {
            let (tx, rx) = mpsc::channel(100);

            let mut tx_guard = self.command_tx.lock().await;
            *tx_guard = Some(tx);
            drop(tx_guard);

            tokio::spawn(config_actor(
                rx,
                Arc::clone(&self.config),
                Arc::clone(&self.config_dir),
            ));

            *init_guard = true;
            info!("Config store actor spawned");
        }
    }
}

/// Config actor task.
///
/// Processes merge commands sequentially.
async fn config_actor(
    mut command_rx: mpsc::Receiver<ConfigCommand>,
    config: Arc<RwLock<RelayConfig>>,
    config_dir: Arc<Option<PathBuf>>,
) {
    info!("Config store actor started");

    while let Some(cmd) = command_rx.recv().await {
        match cmd {
            ConfigCommand::Merge { patch, reply } => {
                let merged = {
                    let current = config.read().await;
                    let mut merged = current.clone();
                    patch.apply(&mut merged);
                    merged
                };

                if let Err(e) = merged.validate() {
                    error!("Config validation failed, patch rejected: {}", e);
                    let _ = reply.send(Err(e));
                    continue;
                }

                {
                    let mut config_write = config.write().await;
                    *config_write = merged.clone();
                }
                info!("Config updated in memory");

                let outcome = match config_dir.as_ref() {
                    Some(dir) => merged.save(dir).inspect_err(|e| {
                        error!("Config saved to memory but disk write failed: {}", e)
                    }),
                    None => Ok(()),
                };

                let _ = reply.send(outcome);
            }
        }
    }

    warn!("Config store actor stopped");
}
