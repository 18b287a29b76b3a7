// Unit tests for environment settings

use crate::logger::DEFAULT_LOG_LEVEL;
use crate::settings::{
    CLIENT_ID_VAR, CONFIG_DIR_VAR, DEFAULT_LISTEN, DEFAULT_OPENER, LISTEN_VAR, LOG_DIR_VAR,
    LOG_LEVEL_VAR, OPENER_VAR, Settings, UI_ADDRESS_VAR,
};

use std::collections::HashMap;
use std::path::PathBuf;

use log::LevelFilter;
use serial_test::serial;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

/// **VALUE**: With only a log directory set, every other setting has a sane
/// default.
#[test]
fn given_minimal_environment_when_loaded_then_defaults() {
    // GIVEN: Only the log directory
    let vars = lookup(&[(LOG_DIR_VAR, "/tmp/relay-logs")]);

    // WHEN: Loading settings
    let settings = Settings::from_lookup(vars).expect("settings");

    // THEN: Defaults apply
    assert_eq!(settings.listen.to_string(), DEFAULT_LISTEN);
    assert_eq!(settings.log_dir, PathBuf::from("/tmp/relay-logs"));
    assert_eq!(settings.config_dir, None);
    assert_eq!(settings.ui_address, None);
    assert_eq!(settings.opener, DEFAULT_OPENER);
    assert_eq!(settings.log_level, DEFAULT_LOG_LEVEL);
    assert!(!settings.client_id.is_empty(), "random client id expected");
}

#[test]
fn given_full_environment_when_loaded_then_values_used() {
    let vars = lookup(&[
        (CONFIG_DIR_VAR, "/etc/rpc-relay"),
        (LOG_DIR_VAR, "/var/log/rpc-relay"),
        (LISTEN_VAR, "127.0.0.1:9000"),
        (UI_ADDRESS_VAR, "127.0.0.1:8280"),
        (OPENER_VAR, "firefox --new-window"),
        (CLIENT_ID_VAR, "relay-7"),
        (LOG_LEVEL_VAR, "trace"),
    ]);

    let settings = Settings::from_lookup(vars).expect("settings");

    assert_eq!(settings.config_dir, Some(PathBuf::from("/etc/rpc-relay")));
    assert_eq!(settings.listen.port(), 9000);
    assert_eq!(settings.ui_address.as_deref(), Some("127.0.0.1:8280"));
    assert_eq!(settings.opener, "firefox --new-window");
    assert_eq!(settings.client_id, "relay-7");
    assert_eq!(settings.log_level, LevelFilter::Trace);
}

/// **VALUE**: Blank variables count as unset.
///
/// **BUG THIS CATCHES**: Would catch `RPC_RELAY_UI_ADDRESS=` in a `.env`
/// overriding the stored address with an empty one.
#[test]
fn given_blank_values_when_loaded_then_treated_as_unset() {
    let vars = lookup(&[
        (LOG_DIR_VAR, "/tmp/relay-logs"),
        (UI_ADDRESS_VAR, "   "),
        (CLIENT_ID_VAR, ""),
    ]);

    let settings = Settings::from_lookup(vars).expect("settings");

    assert_eq!(settings.ui_address, None);
    assert!(!settings.client_id.is_empty());
}

#[test]
fn given_bad_listen_address_when_loaded_then_settings_error() {
    let vars = lookup(&[(LOG_DIR_VAR, "/tmp"), (LISTEN_VAR, "localhost")]);

    let err = Settings::from_lookup(vars).expect_err("not a socket address");

    assert!(err.to_string().contains(LISTEN_VAR));
}

#[test]
fn given_bad_log_level_when_loaded_then_settings_error() {
    let vars = lookup(&[(LOG_DIR_VAR, "/tmp"), (LOG_LEVEL_VAR, "loud")]);

    let err = Settings::from_lookup(vars).expect_err("not a level");

    assert!(err.to_string().contains(LOG_LEVEL_VAR));
}

/// **VALUE**: `from_env` reads the real process environment.
#[test]
#[serial]
fn given_process_environment_when_from_env_then_read() {
    // SAFETY: serialized with every other test touching the environment
    unsafe {
        std::env::set_var(LOG_DIR_VAR, "/tmp/relay-env-logs");
        std::env::set_var(CLIENT_ID_VAR, "from-env");
    }

    let settings = Settings::from_env();

    unsafe {
        std::env::remove_var(LOG_DIR_VAR);
        std::env::remove_var(CLIENT_ID_VAR);
    }

    let settings = settings.expect("settings");
    assert_eq!(settings.log_dir, PathBuf::from("/tmp/relay-env-logs"));
    assert_eq!(settings.client_id, "from-env");
}
