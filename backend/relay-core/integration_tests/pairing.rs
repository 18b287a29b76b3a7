use crate::helpers::{
    CLIENT_ID, MockNode, NODE_TOKEN, eventually, start_transport, token, unpaired_transport,
    wait_connected,
};

use relay_core::config::RelayConfig;
use relay_core::pairing::PairingState;

use std::time::Duration;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// **VALUE**: With no stored token and a reachable node UI, the transport
/// opens the pairing page and closes it again once the token arrives.
///
/// **WHY THIS MATTERS**: This is the first-run experience. The user approves
/// the relay in the node UI, which hands back the token.
///
/// **BUG THIS CATCHES**: Would catch a wrong pairing URL, the surface staying
/// open after pairing, or the token not being persisted.
#[tokio::test]
async fn given_reachable_ui_when_token_delivered_then_surface_closed_and_token_stored() {
    // GIVEN: A node UI answering HTTP
    let ui = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&ui)
        .await;

    // WHEN: A transport starts without a token
    let (transport, config, launcher) = start_transport(RelayConfig {
        ui_address: ui.address().to_string(),
        ..Default::default()
    });

    // THEN: The pairing page is opened once, with our client id
    eventually("pairing page opened", || async { launcher.opened().len() == 1 }).await;
    assert_eq!(
        launcher.opened()[0].as_str(),
        format!("http://{}/#/?from={CLIENT_ID}", ui.address())
    );
    assert_eq!(transport.retry_count().await, 0);

    // WHEN: The UI hands over a token
    transport
        .deliver_token(token("fresh-token"), Some("seed-42".to_string()))
        .await
        .expect("delivered");

    // THEN: Surface closed, token and seed stored, waiting for the connection
    eventually("surface closed", || async { launcher.closed() == 1 }).await;
    let stored = config.get().await;
    assert_eq!(stored.token, Some(token("fresh-token")));
    assert_eq!(stored.session_seed.as_deref(), Some("seed-42"));
    assert_eq!(transport.session_seed().await.as_deref(), Some("seed-42"));
    assert_eq!(transport.pairing_state().await, PairingState::TokenReceived);
    assert_eq!(launcher.opened().len(), 1);
}

/// **VALUE**: An unreachable UI is retried with a growing delay and no
/// surface is opened.
#[tokio::test]
async fn given_unreachable_ui_when_started_then_retries_grow() {
    let (transport, _config, launcher) = unpaired_transport();

    eventually("first probe failed", || async {
        transport.pairing_state().await == PairingState::FetchFailed
    })
    .await;
    eventually("second probe failed", || async {
        transport.retry_count().await >= 2
    })
    .await;

    assert!(launcher.opened().is_empty());
}

/// **VALUE**: A token arriving while a retry is pending cancels the retry and
/// resets the counter.
///
/// **BUG THIS CATCHES**: Would catch the old retry timer firing after pairing
/// and sending the transport back to probing the UI.
#[tokio::test]
async fn given_pending_retry_when_token_delivered_then_retry_cancelled() {
    // GIVEN: A transport backing off after a failed probe
    let (transport, config, _launcher) = unpaired_transport();
    eventually("probe failed", || async { transport.retry_count().await >= 1 }).await;

    // WHEN: A token arrives
    transport
        .deliver_token(token("late-token"), None)
        .await
        .expect("delivered");

    // THEN: Counter reset, token stored, no further probing
    eventually("token received", || async {
        transport.pairing_state().await == PairingState::TokenReceived
    })
    .await;
    assert_eq!(transport.retry_count().await, 0);
    assert_eq!(config.get().await.token, Some(token("late-token")));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(transport.pairing_state().await, PairingState::TokenReceived);
    assert_eq!(transport.retry_count().await, 0);
}

/// **VALUE**: Full pairing against a node: token in, authenticated
/// connection up, state Paired.
#[tokio::test]
async fn given_node_when_token_delivered_then_paired_and_connected() {
    let node = MockNode::start().await;
    let (transport, config, _launcher) = start_transport(RelayConfig {
        ui_address: node.address(),
        ..Default::default()
    });

    transport
        .deliver_token(token(NODE_TOKEN), None)
        .await
        .expect("delivered");

    wait_connected(&transport).await;
    eventually("paired", || async {
        transport.pairing_state().await == PairingState::Paired
    })
    .await;
    assert_eq!(config.get().await.token, Some(token(NODE_TOKEN)));
    assert!(node.connections() >= 1);
}

/// **VALUE**: A stored token the node refuses is forgotten and pairing starts
/// over.
///
/// **WHY THIS MATTERS**: Tokens can be revoked in the node UI. Without this the
/// relay would retry the dead token forever.
#[tokio::test]
async fn given_revoked_token_when_node_refuses_then_token_forgotten_and_repairing() {
    // GIVEN: A stored token the node does not accept
    let node = MockNode::start().await;
    let (transport, config, _launcher) = start_transport(RelayConfig {
        token: Some(token("revoked-token")),
        ui_address: node.address(),
        ..Default::default()
    });

    // THEN: The handshake is refused and the token dropped
    eventually("token forgotten", || async { config.get().await.token.is_none() }).await;
    assert!(node.rejected() >= 1);
    assert_eq!(node.connections(), 0);
    eventually("back to pairing", || async {
        transport.pairing_state().await != PairingState::Paired
    })
    .await;

    // WHEN: A valid token is delivered
    transport
        .deliver_token(token(NODE_TOKEN), None)
        .await
        .expect("delivered");

    // THEN: Paired
    wait_connected(&transport).await;
    eventually("paired", || async {
        transport.pairing_state().await == PairingState::Paired
    })
    .await;
}
