// Unit tests for the daemon error type

use crate::error::RelayDaemonError;

use relay_core::error::config::ConfigError;

use common::ErrorLocation;

use std::panic::Location;

/// **VALUE**: Daemon errors serialize with their variant tag.
///
/// **WHY THIS MATTERS**: Startup failures are also emitted as one JSON line
/// for supervisors; a non-serializable field would silently drop it.
#[test]
fn given_settings_error_when_serialized_then_tagged_json() {
    // GIVEN: A settings error
    let err = RelayDaemonError::settings("RPC_RELAY_LISTEN is not a socket address");

    // WHEN: Serializing to JSON
    let json = serde_json::to_value(&err).expect("serializable");

    // THEN: Tagged with the variant and carrying the message
    assert_eq!(json["type"], "Settings");
    assert_eq!(
        json["data"]["message"],
        "RPC_RELAY_LISTEN is not a socket address"
    );
    assert!(json["data"]["location"]["line"].is_u64());
}

#[test]
fn given_config_error_when_converted_then_core_variant() {
    let err: RelayDaemonError = ConfigError::ValidationError {
        location: ErrorLocation::from(Location::caller()),
        reason: "bad address".to_string(),
    }
    .into();

    assert!(matches!(err, RelayDaemonError::Core { .. }));
    assert!(err.to_string().contains("bad address"));
}
