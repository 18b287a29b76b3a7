use crate::helpers::{
    MockNode, NODE_TOKEN, NODE_VERSION, PAGE_ORIGIN, UNREACHABLE_ADDRESS, eventually, page_on,
    paired_transport, token, unpaired_transport, wait_connected,
};

use relay_core::config::{ConfigStore, RelayConfig};
use relay_core::pairing::PairingState;
use relay_core::proto::{PageMessage, RelayMessage};
use relay_core::provider::{PageProvider, ProviderOptions};
use relay_core::relay::{Relay, start_relay_server};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use url::Url;

const UNPAIRED_UI_ORIGIN: &str = "http://127.0.0.1:1";

/// **VALUE**: A page request travels provider -> relay -> transport -> node
/// and back, and the first successful answer shows the panel once.
#[tokio::test]
async fn given_connected_transport_when_page_calls_then_result_and_panel_shown() {
    // GIVEN: A connected transport and an in-process page
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    let page = page_on(&transport, PAGE_ORIGIN, UNPAIRED_UI_ORIGIN);

    // WHEN: The page calls the node
    let version = page
        .execute("web3_clientVersion", vec![])
        .await
        .expect("call succeeds");

    // THEN: The result is the node's and the panel is shown
    assert_eq!(version, json!(NODE_VERSION));
    eventually("panel shown", || async { page.panel_visible() }).await;
    assert!(page.is_connected());
}

/// **VALUE**: Before pairing, page calls fail fast with `UNINITIALIZED` and
/// the panel stays hidden.
///
/// **BUG THIS CATCHES**: Would catch the relay showing its UI for a node it
/// cannot reach, or page calls waiting for their timeout.
#[tokio::test]
async fn given_unpaired_transport_when_page_calls_then_uninitialized_without_panel() {
    let (transport, _config, _launcher) = unpaired_transport();
    let page = page_on(&transport, PAGE_ORIGIN, UNPAIRED_UI_ORIGIN);

    let error = page
        .execute("eth_blockNumber", vec![])
        .await
        .expect_err("no node connection");

    assert!(error.is_uninitialized());
    assert!(!page.is_connected());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!page.panel_visible());
}

/// **VALUE**: The panel hides when the connection is lost and shows again
/// once calls succeed.
#[tokio::test]
async fn given_shown_panel_when_transport_closes_then_panel_hidden_then_shown_again() {
    // GIVEN: A page whose panel is shown
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    let page = page_on(&transport, PAGE_ORIGIN, UNPAIRED_UI_ORIGIN);
    page.execute("web3_clientVersion", vec![]).await.expect("call");
    eventually("panel shown", || async { page.panel_visible() }).await;

    // WHEN: The transport closes and the page calls again
    transport.close().await.expect("closed");
    let error = page.execute("web3_clientVersion", vec![]).await.expect_err("closed");

    // THEN: The panel is hidden
    assert!(error.is_uninitialized());
    eventually("panel hidden", || async { !page.panel_visible() }).await;

    // WHEN: The connection is reopened and a call succeeds
    transport.open(token(NODE_TOKEN)).await.expect("reopen");
    eventually("call succeeds again", || async {
        page.execute("web3_clientVersion", vec![]).await.is_ok()
    })
    .await;

    // THEN: The panel is shown again
    eventually("panel shown again", || async { page.panel_visible() }).await;
}

/// **VALUE**: Replacing the node connection invalidates page subscriptions.
///
/// **BUG THIS CATCHES**: The new connection bumps the generation, so the old
/// connection's close event is discarded. Without an explicit status push the
/// page keeps a subscription whose node-side route died with the old socket.
#[tokio::test]
async fn given_page_subscription_when_connection_replaced_then_purged_and_close_fired() {
    // GIVEN: A page with a live subscription and a close listener
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    let page = page_on(&transport, PAGE_ORIGIN, UNPAIRED_UI_ORIGIN);
    page.subscribe("eth", |_| {}, vec![json!("newHeads")])
        .await
        .expect("subscribed");
    assert_eq!(page.subscription_count().await, 1);

    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    page.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .await;

    // WHEN: A token is delivered again, replacing the connection
    transport.open(token(NODE_TOKEN)).await.expect("reopen");

    // THEN: The subscription is purged and the listener fired
    eventually("subscription purged", || async {
        page.subscription_count().await == 0
    })
    .await;
    assert!(closes.load(Ordering::SeqCst) >= 1);

    // THEN: The new connection serves the page
    wait_connected(&transport).await;
    eventually("page reconnected", || async {
        page.execute("web3_clientVersion", vec![]).await.is_ok()
    })
    .await;
    assert!(page.is_connected());
}

/// **VALUE**: Pages get their own accounts through the relay.
#[tokio::test]
async fn given_connected_transport_when_page_asks_accounts_then_cached_list() {
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    let page = page_on(&transport, PAGE_ORIGIN, UNPAIRED_UI_ORIGIN);

    let accounts = page.accounts().await.expect("accounts");
    let again = page.accounts().await.expect("cached accounts");

    assert_eq!(accounts, again);
    assert_eq!(page.coinbase().await, accounts.first().cloned());
    assert_eq!(node.calls("parity_getDappsAddresses"), 1);
}

/// **VALUE**: Only the node UI's own origin may hand over a pairing token.
///
/// **WHY THIS MATTERS**: Any page can post a `token` message. Accepting it
/// from arbitrary origins would let a hostile site point the relay at a node
/// of its choosing.
///
/// **BUG THIS CATCHES**: Would catch the origin check being skipped or
/// compared against the wrong value.
#[tokio::test]
async fn given_token_message_when_origin_differs_then_ignored_else_persisted() {
    // GIVEN: An unpaired transport and a relay for a foreign page
    let (transport, config, _launcher) = unpaired_transport();
    let (page_tx, page_rx) = mpsc::channel(8);
    let (relay_tx, _relay_rx) = mpsc::channel(8);
    tokio::spawn(Relay::new(PAGE_ORIGIN, UNPAIRED_UI_ORIGIN, transport.clone()).run(page_rx, relay_tx));

    // WHEN: The foreign page sends a token
    page_tx
        .send(PageMessage::Token {
            token: "hostile-token".to_string(),
            session_seed: None,
        })
        .await
        .expect("sent");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // THEN: Nothing is stored
    assert_eq!(config.get().await.token, None);
    assert_ne!(transport.pairing_state().await, PairingState::TokenReceived);

    // WHEN: The node UI itself sends a token
    let (ui_tx, ui_rx) = mpsc::channel(8);
    let (ui_relay_tx, _ui_relay_rx) = mpsc::channel(8);
    tokio::spawn(Relay::new(UNPAIRED_UI_ORIGIN, UNPAIRED_UI_ORIGIN, transport.clone()).run(ui_rx, ui_relay_tx));
    ui_tx
        .send(PageMessage::Token {
            token: "ui-token".to_string(),
            session_seed: Some("seed-1".to_string()),
        })
        .await
        .expect("sent");

    // THEN: The token and seed are persisted
    eventually("token persisted", || async {
        config.get().await.token == Some(token("ui-token"))
    })
    .await;
    assert_eq!(transport.session_seed().await.as_deref(), Some("seed-1"));
}

/// **VALUE**: The socket server end to end: a page connecting with an
/// `Origin` header gets a relay and can call the node.
#[tokio::test]
async fn given_relay_server_when_page_connects_with_origin_then_calls_work() {
    // GIVEN: A connected transport behind a relay server on an ephemeral port
    let node = MockNode::start().await;
    let (transport, config) = paired_transport(&node).await;
    let server = start_relay_server("127.0.0.1:0".parse().expect("addr"), transport, config)
        .await
        .expect("server started");
    let url = Url::parse(&format!("ws://{}/", server.local_addr())).expect("url");

    // WHEN: A page connects and calls the node
    let page = PageProvider::connect(&url, PAGE_ORIGIN, ProviderOptions::default())
        .await
        .expect("connected");
    let version = page.execute("web3_clientVersion", vec![]).await.expect("call");

    // THEN: The call went through
    assert_eq!(version, json!(NODE_VERSION));
    server.shutdown();
}

/// **VALUE**: Upgrades without an `Origin` header are refused.
///
/// **BUG THIS CATCHES**: Would catch the relay serving a client whose page
/// origin is unknown, which defeats per-origin accounts.
#[tokio::test]
async fn given_relay_server_when_origin_missing_then_handshake_rejected() {
    let node = MockNode::start().await;
    let (transport, config) = paired_transport(&node).await;
    let server = start_relay_server("127.0.0.1:0".parse().expect("addr"), transport, config)
        .await
        .expect("server started");

    let result = connect_async(format!("ws://{}/", server.local_addr())).await;

    assert!(result.is_err(), "handshake without Origin must fail");
    server.shutdown();
}

/// **VALUE**: With integration disabled the server serves nothing.
#[tokio::test]
async fn given_integration_disabled_when_page_connects_then_dropped() {
    let (transport, _config, _launcher) = unpaired_transport();
    let config = ConfigStore::in_memory(RelayConfig {
        ui_address: UNREACHABLE_ADDRESS.to_string(),
        integration_enabled: false,
        ..Default::default()
    });
    let server = start_relay_server("127.0.0.1:0".parse().expect("addr"), transport, config)
        .await
        .expect("server started");
    let url = Url::parse(&format!("ws://{}/", server.local_addr())).expect("url");

    let result = PageProvider::connect(&url, PAGE_ORIGIN, ProviderOptions::default()).await;

    assert!(result.is_err(), "disabled relay must not complete a handshake");
    server.shutdown();
}

/// **VALUE**: Dropping the page side ends the relay cleanly.
#[tokio::test]
async fn given_running_relay_when_page_channel_closes_then_relay_returns() {
    let (transport, _config, _launcher) = unpaired_transport();
    let (page_tx, page_rx) = mpsc::channel::<PageMessage>(8);
    let (relay_tx, _relay_rx) = mpsc::channel::<RelayMessage>(8);
    let relay = tokio::spawn(Relay::new(PAGE_ORIGIN, UNPAIRED_UI_ORIGIN, transport).run(page_rx, relay_tx));

    drop(page_tx);

    let outcome = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay finished")
        .expect("relay task did not panic");
    assert!(outcome.is_ok());
}
