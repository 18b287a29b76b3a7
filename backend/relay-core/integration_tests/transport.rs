use crate::helpers::{
    DEFAULT_ACCOUNT, MockNode, NODE_VERSION, PAGE_ORIGIN, eventually, paired_transport,
    unpaired_transport, wait_connected,
};

use relay_core::proto::{
    AccountsResponse, ErrorCode, PortMessage, PortRequest, RequestKind, rpc_call,
};
use relay_core::transport::ConnectionState;

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

const RECV_WINDOW: Duration = Duration::from_secs(5);

async fn next_message(port: &mut relay_core::transport::Port) -> PortMessage {
    timeout(RECV_WINDOW, port.recv())
        .await
        .expect("port message in time")
        .expect("port still attached")
}

/// Skip status pushes until the next response or notification.
async fn next_reply(port: &mut relay_core::transport::Port) -> PortMessage {
    loop {
        match next_message(port).await {
            PortMessage::Status { .. } => continue,
            other => return other,
        }
    }
}

/// **VALUE**: A transport that never opened a node connection reports it and
/// refuses work without touching the network.
///
/// **WHY THIS MATTERS**: Pages that load before pairing must see the well-known
/// `UNINITIALIZED` code so the relay can show its panel.
///
/// **BUG THIS CATCHES**: Would catch requests being queued (and hanging) while
/// no connection exists, or a wrong initial status.
#[tokio::test]
async fn given_no_token_when_requests_arrive_then_uninitialized() {
    // GIVEN: A transport with no stored token
    let (transport, _config, _launcher) = unpaired_transport();

    // THEN: Status is Uninitialized
    assert_eq!(transport.status().await, ConnectionState::Uninitialized);
    assert_eq!(transport.version().await, None);

    // WHEN: A page asks for accounts
    let response = transport.request_accounts(PAGE_ORIGIN).await;

    // THEN: The request fails with UNINITIALIZED and nothing is cached
    assert_eq!(response, AccountsResponse::failed(ErrorCode::Uninitialized));
    assert!(transport.accounts_snapshot().await.expect("snapshot").is_empty());

    // WHEN: A raw request goes through a port
    let mut port = transport.open_port().await.expect("port");
    port.forward(PortRequest {
        id: 7,
        payload: rpc_call(7, "eth_blockNumber", vec![]),
        kind: RequestKind::Call,
        origin: PAGE_ORIGIN.to_string(),
    })
    .await
    .expect("forwarded");

    // THEN: The port gets an UNINITIALIZED response with the caller's id
    match next_reply(&mut port).await {
        PortMessage::Response(response) => {
            assert_eq!(response.id, 7);
            assert_eq!(response.err, Some(ErrorCode::Uninitialized));
            assert_eq!(response.payload, None);
        }
        other => panic!("expected a response, got {other:?}"),
    }

    // THEN: Direct calls fail the same way
    let error = transport
        .execute("eth_blockNumber", vec![])
        .await
        .expect_err("no connection");
    assert!(error.is_uninitialized());
}

/// **VALUE**: A stored token opens the node connection on start and the node's
/// version becomes readable.
#[tokio::test]
async fn given_stored_token_when_started_then_connected_with_version() {
    // GIVEN: A node and a transport holding its token
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;

    // THEN: Version is fetched after the open event
    eventually("node version", || async {
        transport.version().await.as_deref() == Some(NODE_VERSION)
    })
    .await;
    assert_eq!(node.connections(), 1);
}

/// **VALUE**: Forwarded requests come back with the caller's own id even though
/// the node saw a different one.
///
/// **BUG THIS CATCHES**: Would catch two pages using the same id colliding on
/// the shared node socket, or the wire id leaking back to the page.
#[tokio::test]
async fn given_two_ports_with_same_id_when_forwarded_then_each_gets_own_response() {
    // GIVEN: A connected transport and two attached ports
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    let mut first = transport.open_port().await.expect("first port");
    let mut second = transport.open_port().await.expect("second port");

    // WHEN: Both forward a request with id 1
    for port in [&first, &second] {
        port.forward(PortRequest {
            id: 1,
            payload: rpc_call(1, "echo_id", vec![]),
            kind: RequestKind::Call,
            origin: PAGE_ORIGIN.to_string(),
        })
        .await
        .expect("forwarded");
    }

    // THEN: Each port gets exactly its response, with id 1 restored
    let mut wire_ids = Vec::new();
    for port in [&mut first, &mut second] {
        match next_reply(port).await {
            PortMessage::Response(response) => {
                assert_eq!(response.id, 1);
                assert_eq!(response.err, None);
                let payload = response.payload.expect("raw node response");
                assert_eq!(payload["id"], json!(1));
                wire_ids.push(payload["result"].clone());
            }
            other => panic!("expected a response, got {other:?}"),
        }
    }

    // THEN: The node saw two distinct ids
    assert_ne!(wire_ids[0], wire_ids[1]);
}

/// **VALUE**: JSON-RPC errors from the node are passed through untouched.
///
/// **WHY THIS MATTERS**: Only transport failures become error codes; an RPC
/// error is a successful round trip whose payload carries `error`.
#[tokio::test]
async fn given_node_error_when_forwarded_then_raw_error_payload() {
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    let mut port = transport.open_port().await.expect("port");

    port.forward(PortRequest {
        id: 3,
        payload: rpc_call(3, "fail_method", vec![]),
        kind: RequestKind::Call,
        origin: PAGE_ORIGIN.to_string(),
    })
    .await
    .expect("forwarded");

    match next_reply(&mut port).await {
        PortMessage::Response(response) => {
            assert_eq!(response.err, None);
            let payload = response.payload.expect("payload");
            assert_eq!(payload["error"]["message"], json!("execution reverted"));
        }
        other => panic!("expected a response, got {other:?}"),
    }
}

/// **VALUE**: Accounts are fetched once per origin and served from cache after.
///
/// **BUG THIS CATCHES**: Would catch concurrent first requests each hitting the
/// node, or cached answers being ignored.
#[tokio::test]
async fn given_concurrent_accounts_requests_when_uncached_then_single_node_call() {
    // GIVEN: A node that answers accounts slowly
    let node = MockNode::start().await;
    node.set_accounts_delay(Duration::from_millis(200));
    let (transport, _config) = paired_transport(&node).await;

    // WHEN: Two requests for the same origin race, then a third follows
    let (first, second) = tokio::join!(
        transport.request_accounts(PAGE_ORIGIN),
        transport.request_accounts(PAGE_ORIGIN)
    );
    let third = transport.request_accounts(PAGE_ORIGIN).await;

    // THEN: All three agree and the node was asked once
    let expected = AccountsResponse::ok(vec![DEFAULT_ACCOUNT.to_string()]);
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(third, expected);
    assert_eq!(node.calls("parity_getDappsAddresses"), 1);
}

/// **VALUE**: After a reconnect the cache is rebuilt for every origin it held.
///
/// **WHY THIS MATTERS**: Account lists may change while the connection was
/// down; pages must not keep serving stale lists.
#[tokio::test]
async fn given_cached_origins_when_reconnected_then_all_refetched() {
    // GIVEN: Two origins cached
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    transport.request_accounts(PAGE_ORIGIN).await;
    transport.request_accounts("https://other.example").await;
    assert_eq!(node.calls("parity_getDappsAddresses"), 2);

    // WHEN: The node drops the socket and the account list changes
    node.set_accounts(&["0x1111111111111111111111111111111111111111"]);
    node.disconnect_all();

    // THEN: The transport reconnects and refetches both origins
    eventually("accounts refetched", || async {
        node.calls("parity_getDappsAddresses") >= 4
    })
    .await;
    eventually("cache holds the new list", || async {
        let snapshot = transport.accounts_snapshot().await.expect("snapshot");
        snapshot.len() == 2
            && snapshot
                .values()
                .all(|list| list == &vec!["0x1111111111111111111111111111111111111111".to_string()])
    })
    .await;
    wait_connected(&transport).await;
    assert!(node.connections() >= 2);
}

/// **VALUE**: Attached ports hear about connection loss and recovery.
#[tokio::test]
async fn given_attached_port_when_node_drops_then_status_pushed() {
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    let mut port = transport.open_port().await.expect("port");

    node.disconnect_all();

    // THEN: A disconnected status, then a connected one after the reconnect
    let mut seen = Vec::new();
    while seen.last() != Some(&true) {
        if let PortMessage::Status { connected } = next_message(&mut port).await {
            seen.push(connected);
        }
    }
    assert_eq!(seen.first(), Some(&false));
}

/// **VALUE**: Notifications reach only the port that subscribed.
///
/// **BUG THIS CATCHES**: Would catch notifications broadcast to every page,
/// leaking one page's subscription data to another.
#[tokio::test]
async fn given_subscription_when_node_notifies_then_only_owner_receives() {
    // GIVEN: Two ports, the first subscribes
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    let mut owner = transport.open_port().await.expect("owner");
    let mut bystander = transport.open_port().await.expect("bystander");

    owner
        .forward(PortRequest {
            id: 10,
            payload: rpc_call(10, "eth_subscribe", vec![json!("newHeads")]),
            kind: RequestKind::Subscribe,
            origin: PAGE_ORIGIN.to_string(),
        })
        .await
        .expect("forwarded");

    // THEN: The owner sees the subscribe response and the notification
    let mut got_response = false;
    let mut got_notification = false;
    while !(got_response && got_notification) {
        match next_reply(&mut owner).await {
            PortMessage::Response(response) => {
                assert_eq!(response.id, 10);
                got_response = true;
            }
            PortMessage::Notification(notification) => {
                assert_eq!(notification.method, "eth_subscription");
                assert_eq!(notification.result, json!({ "number": "0x1" }));
                got_notification = true;
            }
            PortMessage::Status { .. } => {}
        }
    }

    // THEN: The bystander got nothing
    let quiet = timeout(Duration::from_millis(200), next_reply(&mut bystander)).await;
    assert!(quiet.is_err(), "bystander must not receive notifications");
}

/// **VALUE**: Closing the transport drops the connection but keeps the cache.
#[tokio::test]
async fn given_connected_when_closed_then_disconnected_and_cache_kept() {
    let node = MockNode::start().await;
    let (transport, _config) = paired_transport(&node).await;
    transport.request_accounts(PAGE_ORIGIN).await;

    transport.close().await.expect("closed");

    assert_eq!(transport.status().await, ConnectionState::Disconnected);
    assert_eq!(transport.version().await, None);
    let snapshot = transport.accounts_snapshot().await.expect("snapshot");
    assert!(snapshot.contains_key(PAGE_ORIGIN));

    // THEN: New work is refused while closed
    let response = transport.request_accounts("https://new.example").await;
    assert_eq!(response.err, Some(ErrorCode::Uninitialized));
}
