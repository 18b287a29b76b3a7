// Unit tests for daemon startup wiring

use crate::daemon::RelayDaemon;
use crate::settings::Settings;

use relay_core::config::{CONFIG_FILE_NAME, RelayConfig};
use relay_core::transport::ConnectionState;

use std::path::Path;

use log::LevelFilter;
use tempfile::TempDir;

fn settings(config_dir: &Path) -> Settings {
    Settings {
        config_dir: Some(config_dir.to_path_buf()),
        log_dir: config_dir.to_path_buf(),
        listen: "127.0.0.1:0".parse().expect("addr"),
        ui_address: Some("127.0.0.1:1".to_string()),
        opener: "true".to_string(),
        client_id: "daemon-test".to_string(),
        log_level: LevelFilter::Debug,
    }
}

/// **VALUE**: The daemon starts with an empty config directory, binds its
/// server and waits for pairing.
#[tokio::test]
async fn given_empty_config_dir_when_started_then_serving_unpaired() {
    // GIVEN: No config file yet
    let dir = TempDir::new().expect("temp dir");

    // WHEN: Starting the daemon
    let daemon = RelayDaemon::start(settings(dir.path()))
        .await
        .expect("daemon started");

    // THEN: Bound on an ephemeral port with the overridden UI address
    assert_ne!(daemon.local_addr().port(), 0);
    assert_eq!(daemon.config().get().await.ui_address, "127.0.0.1:1");
    assert_eq!(daemon.transport().status().await, ConnectionState::Uninitialized);

    daemon.shutdown().await;
}

/// **VALUE**: A corrupt config file stops startup instead of silently
/// discarding a stored token.
#[tokio::test]
async fn given_corrupt_config_when_started_then_error() {
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{ not json").expect("write");

    let result = RelayDaemon::start(settings(dir.path())).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn given_invalid_ui_override_when_started_then_error() {
    let dir = TempDir::new().expect("temp dir");
    let mut settings = settings(dir.path());
    settings.ui_address = Some("host/with/path".to_string());

    let result = RelayDaemon::start(settings).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn given_stored_config_when_no_override_then_stored_address_kept() {
    let dir = TempDir::new().expect("temp dir");
    RelayConfig {
        ui_address: "127.0.0.1:2".to_string(),
        ..Default::default()
    }
    .save(dir.path())
    .expect("saved");
    let mut settings = settings(dir.path());
    settings.ui_address = None;

    let daemon = RelayDaemon::start(settings).await.expect("daemon started");

    assert_eq!(daemon.config().get().await.ui_address, "127.0.0.1:2");
    daemon.shutdown().await;
}
