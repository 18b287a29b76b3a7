// Unit tests for relay configuration

use crate::DEFAULT_UI_ADDRESS;
use crate::config::{ConfigPatch, RelayConfig};

use common::PairingToken;

#[test]
fn given_default_config_when_validated_then_ok_and_unpaired() {
    let config = RelayConfig::default();

    assert!(config.validate().is_ok());
    assert!(config.token.is_none());
    assert_eq!(config.ui_address, DEFAULT_UI_ADDRESS);
    assert!(config.integration_enabled);
}

/// **VALUE**: One address yields the UI URL, the node socket URL and the pairing origin.
///
/// **BUG THIS CATCHES**: Would catch a trailing-slash or scheme mismatch that makes the
/// relay reject tokens from the real pairing page.
#[test]
fn given_ui_address_when_deriving_urls_then_schemes_and_origin_match() {
    // GIVEN: A custom address
    let config = RelayConfig {
        ui_address: "127.0.0.1:9000".to_string(),
        ..Default::default()
    };

    // THEN: http UI, ws node, origin without trailing slash
    assert_eq!(config.ui_url().expect("url").as_str(), "http://127.0.0.1:9000/");
    assert_eq!(config.node_url().expect("url").as_str(), "ws://127.0.0.1:9000/");
    assert_eq!(config.ui_origin().expect("origin"), "http://127.0.0.1:9000");
}

#[test]
fn given_address_with_path_when_validated_then_rejected() {
    let config = RelayConfig {
        ui_address: "127.0.0.1:9000/ui".to_string(),
        ..Default::default()
    };

    assert!(config.validate().is_err());
}

/// **VALUE**: Patches only touch the fields they name.
///
/// **WHY THIS MATTERS**: The transport writes the token without knowing the UI address;
/// a patch that reset unrelated fields would silently move the node.
#[test]
fn given_pairing_patch_when_applied_then_other_fields_untouched() {
    // GIVEN: A customised config
    let mut config = RelayConfig {
        ui_address: "127.0.0.1:9000".to_string(),
        integration_enabled: false,
        ..Default::default()
    };
    let token = PairingToken::parse("patched-token").expect("valid");

    // WHEN: Applying a pairing patch
    ConfigPatch::pairing(token.clone(), Some("s1".to_string())).apply(&mut config);

    // THEN: Token + seed set, the rest kept
    assert_eq!(config.token, Some(token));
    assert_eq!(config.session_seed.as_deref(), Some("s1"));
    assert_eq!(config.ui_address, "127.0.0.1:9000");
    assert!(!config.integration_enabled);

    // WHEN: Forgetting the pairing
    ConfigPatch::forget_pairing().apply(&mut config);

    // THEN: Both cleared
    assert!(config.token.is_none());
    assert!(config.session_seed.is_none());
}

#[test]
fn given_partial_json_when_deserialized_then_defaults_fill_gaps() {
    let config: RelayConfig = serde_json::from_str(r#"{"token":"from-disk"}"#).expect("valid");

    assert_eq!(config.token.as_ref().map(PairingToken::as_str), Some("from-disk"));
    assert_eq!(config.ui_address, DEFAULT_UI_ADDRESS);
    assert_eq!(config.version, 1);
    assert!(config.integration_enabled);
}

#[test]
fn given_config_when_saved_and_loaded_then_token_survives() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RelayConfig {
        token: Some(PairingToken::parse("disk-token").expect("valid")),
        session_seed: Some("seed".to_string()),
        ..Default::default()
    };

    config.save(dir.path()).expect("save");
    let loaded = RelayConfig::load(dir.path()).expect("load");

    assert_eq!(loaded, config);
    assert!(!dir.path().join("config.json.tmp").exists());
}

#[test]
fn given_missing_file_when_loaded_then_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");

    let loaded = RelayConfig::load(dir.path()).expect("load");

    assert_eq!(loaded, RelayConfig::default());
}

#[test]
fn given_corrupt_file_when_loaded_then_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("config.json"), "{ not json").expect("write");

    let result = RelayConfig::load(dir.path());

    assert!(result.is_err());
}
