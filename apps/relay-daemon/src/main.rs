use relay_daemon::daemon::RelayDaemon;
use relay_daemon::error::RelayDaemonError;
use relay_daemon::logger::initialize as LoggerInitialize;
use relay_daemon::settings::Settings;

use std::fs::create_dir_all;

use log::{error, info};

#[tokio::main]
async fn main() -> Result<(), RelayDaemonError> {
    let settings = Settings::from_env()?;

    create_dir_all(&settings.log_dir).map_err(|e| {
        RelayDaemonError::daemon(format!("Failed to create log directory: {e}"))
    })?;

    // Initialize logger FIRST
    LoggerInitialize(&settings.log_dir, settings.log_level)?;

    info!("RPC relay starting");
    info!("Log directory: {}", settings.log_dir.display());

    let daemon = match RelayDaemon::start(settings).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("{e}");
            if let Ok(json) = serde_json::to_string(&e) {
                error!("{json}");
            }
            return Err(e);
        }
    };
    info!("Serving pages on ws://{}", daemon.local_addr());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| RelayDaemonError::daemon(format!("Failed to wait for Ctrl+C: {e}")))?;

    daemon.shutdown().await;
    info!("RPC relay stopped");
    Ok(())
}
