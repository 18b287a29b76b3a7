//! Page provider against a scripted relay: the test plays the relay side of
//! the channel pair and answers (or withholds) each message by hand.

use crate::helpers::eventually;

use relay_core::proto::{
    AccountsResponse, ErrorCode, Notification, PageMessage, RelayMessage, RequestId, RequestKind,
    RpcResponse, SubscriptionId,
};
use relay_core::provider::{PageProvider, ProviderOptions, SubscriptionApi};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

const SHORT_TIMEOUT: Duration = Duration::from_millis(150);

struct ScriptedRelay {
    from_page: mpsc::Receiver<PageMessage>,
    to_page: mpsc::Sender<RelayMessage>,
}

impl ScriptedRelay {
    async fn next_request(&mut self) -> (RequestId, Value, RequestKind) {
        match timeout(Duration::from_secs(5), self.from_page.recv())
            .await
            .expect("page message in time")
            .expect("page still open")
        {
            PageMessage::Request { id, payload, kind } => (id, payload, kind),
            other => panic!("expected a request, got {other:?}"),
        }
    }

    async fn answer(&self, id: RequestId, result: Value) {
        let payload = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        self.send(RelayMessage::Response(RpcResponse::ok(id, payload)))
            .await;
    }

    async fn fail(&self, id: RequestId, code: ErrorCode) {
        self.send(RelayMessage::Response(RpcResponse::failed(id, code)))
            .await;
    }

    async fn send(&self, message: RelayMessage) {
        self.to_page.send(message).await.expect("page reader alive");
    }
}

fn provider_with(options: ProviderOptions) -> (PageProvider, ScriptedRelay) {
    let (page_tx, from_page) = mpsc::channel(32);
    let (to_page, relay_rx) = mpsc::channel(32);
    let provider = PageProvider::new(page_tx, relay_rx, options);
    (provider, ScriptedRelay { from_page, to_page })
}

fn provider() -> (PageProvider, ScriptedRelay) {
    provider_with(ProviderOptions::default())
}

/// **VALUE**: Out-of-order responses resolve the right callers.
///
/// **BUG THIS CATCHES**: Would catch responses matched by arrival order
/// instead of id.
#[tokio::test]
async fn given_two_requests_when_answered_in_reverse_then_each_gets_own_result() {
    // GIVEN: Two concurrent calls
    let (page, mut relay) = provider();
    let first = tokio::spawn({
        let page = page.clone();
        async move { page.execute("eth_first", vec![]).await }
    });
    let (first_id, first_payload, _) = relay.next_request().await;
    let second = tokio::spawn({
        let page = page.clone();
        async move { page.execute("eth_second", vec![]).await }
    });
    let (second_id, _, _) = relay.next_request().await;

    // THEN: Ids are distinct and the payload carries its id
    assert_ne!(first_id, second_id);
    assert_eq!(first_payload["id"], json!(first_id));
    assert_eq!(first_payload["method"], json!("eth_first"));

    // WHEN: The relay answers the second request first
    relay.answer(second_id, json!("two")).await;
    relay.answer(first_id, json!("one")).await;

    // THEN: Each caller gets its own answer
    assert_eq!(second.await.expect("join").expect("ok"), json!("two"));
    assert_eq!(first.await.expect("join").expect("ok"), json!("one"));
    assert_eq!(page.pending_count().await, 0);
}

/// **VALUE**: Unanswered requests time out and late answers are dropped.
///
/// **BUG THIS CATCHES**: Would catch a late response resolving a caller a
/// second time or resurrecting a pending entry.
#[tokio::test]
async fn given_unanswered_request_when_window_passes_then_timeout_and_late_reply_ignored() {
    // GIVEN: A provider with a short window
    let (page, mut relay) = provider_with(ProviderOptions {
        request_timeout: SHORT_TIMEOUT,
    });

    // WHEN: A request is never answered in time
    let call = tokio::spawn({
        let page = page.clone();
        async move { page.execute("slow_method", vec![]).await }
    });
    let (id, _, _) = relay.next_request().await;
    let error = call.await.expect("join").expect_err("timed out");

    // THEN: It fails with RequestTimeout and nothing is pending
    assert!(error.is_timeout());
    assert_eq!(page.pending_count().await, 0);

    // WHEN: The answer arrives late
    relay.answer(id, json!("late")).await;

    // THEN: The provider keeps working
    let next = tokio::spawn({
        let page = page.clone();
        async move { page.execute("eth_next", vec![]).await }
    });
    let (next_id, _, _) = relay.next_request().await;
    assert_ne!(next_id, id);
    relay.answer(next_id, json!("fine")).await;
    assert_eq!(next.await.expect("join").expect("ok"), json!("fine"));
}

/// **VALUE**: The request window runs on its own, not inside the caller's future.
///
/// **BUG THIS CATCHES**: A caller that gives up early (outer timeout, `select!`,
/// aborted task) would otherwise leave its entry in the table forever.
#[tokio::test]
async fn given_abandoned_request_when_window_passes_then_entry_removed() {
    // GIVEN: A provider with a short request window
    let (page, mut relay) = provider_with(ProviderOptions {
        request_timeout: Duration::from_millis(100),
    });

    // WHEN: The caller drops its request well before the window ends
    let abandoned = timeout(Duration::from_millis(20), page.execute("slow_method", vec![])).await;
    assert!(abandoned.is_err());
    let _ = relay.next_request().await;
    assert_eq!(page.pending_count().await, 1);

    // THEN: The entry is gone once the window has passed
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(page.pending_count().await, 0);
}

/// **VALUE**: Concurrent account lookups are matched by id, not by arrival order.
///
/// **BUG THIS CATCHES**: A fast `UNINITIALIZED` answer overtaking a slower
/// lookup would hand each caller the other's result.
#[tokio::test]
async fn given_two_accounts_requests_when_answered_in_reverse_then_each_gets_own_answer() {
    // GIVEN: Two account lookups in flight
    let (page, mut relay) = provider();

    let first = tokio::spawn({
        let page = page.clone();
        async move { page.refresh_accounts().await }
    });
    let first_id = next_accounts_request(&mut relay).await;

    let second = tokio::spawn({
        let page = page.clone();
        async move { page.refresh_accounts().await }
    });
    let second_id = next_accounts_request(&mut relay).await;
    assert_ne!(first_id, second_id);

    // WHEN: The second is answered before the first
    relay
        .send(RelayMessage::AccountsResponse {
            id: second_id,
            response: AccountsResponse::failed(ErrorCode::Uninitialized),
        })
        .await;
    relay
        .send(RelayMessage::AccountsResponse {
            id: first_id,
            response: AccountsResponse::ok(vec!["0xabc".to_string()]),
        })
        .await;

    // THEN: Each caller receives the answer to its own request
    let second = second.await.expect("join").expect_err("uninitialized");
    assert!(second.is_uninitialized());
    let first = first.await.expect("join").expect("accounts");
    assert_eq!(first, vec!["0xabc".to_string()]);
}

async fn next_accounts_request(relay: &mut ScriptedRelay) -> RequestId {
    match timeout(Duration::from_secs(5), relay.from_page.recv())
        .await
        .expect("in time")
        .expect("open")
    {
        PageMessage::AccountsRequest { id } => id,
        other => panic!("expected accounts request, got {other:?}"),
    }
}

/// **VALUE**: Unsubscribing an unknown id is a local no-op.
#[tokio::test]
async fn given_unknown_subscription_when_unsubscribe_then_false_and_nothing_sent() {
    let (page, mut relay) = provider();

    let removed = page
        .unsubscribe(&SubscriptionId::Text("0xdead".to_string()))
        .await
        .expect("no error");

    assert!(!removed);
    assert!(relay.from_page.try_recv().is_err(), "nothing must be sent");
}

/// **VALUE**: Subscription lifecycle: notifications reach the callback, and the
/// registration survives until the node confirms the unsubscribe.
#[tokio::test]
async fn given_subscription_when_notified_and_unsubscribed_then_callback_then_removed() {
    // GIVEN: A subscription registered through the relay
    let (page, mut relay) = provider();
    let received: Arc<StdMutex<Vec<Value>>> = Arc::default();
    let sink = Arc::clone(&received);

    let subscribe = tokio::spawn({
        let page = page.clone();
        async move {
            page.subscribe(
                "eth",
                move |result| sink.lock().expect("sink").push(result),
                vec![json!("newHeads")],
            )
            .await
        }
    });
    let (id, payload, kind) = relay.next_request().await;
    assert_eq!(payload["method"], json!("eth_subscribe"));
    assert_eq!(kind, RequestKind::Subscribe);
    relay.answer(id, json!("0x9")).await;
    let subscription = subscribe.await.expect("join").expect("subscribed");
    assert_eq!(subscription, SubscriptionId::Text("0x9".to_string()));

    // WHEN: A notification arrives
    relay
        .send(RelayMessage::Notification(Notification {
            subscription: subscription.clone(),
            method: "eth_subscription".to_string(),
            result: json!({ "number": "0x2" }),
        }))
        .await;

    // THEN: The callback sees it
    eventually("callback invoked", || async {
        received.lock().expect("sink").len() == 1
    })
    .await;

    // WHEN: Unsubscribing, before the node answers
    let unsubscribe = tokio::spawn({
        let page = page.clone();
        let subscription = subscription.clone();
        async move { page.unsubscribe(&subscription).await }
    });
    let (id, payload, kind) = relay.next_request().await;
    assert_eq!(payload["method"], json!("eth_unsubscribe"));
    assert_eq!(
        kind,
        RequestKind::Unsubscribe {
            subscription: subscription.clone()
        }
    );

    // THEN: Still registered
    assert_eq!(page.subscription_count().await, 1);

    // WHEN: The node confirms
    relay.answer(id, json!(true)).await;

    // THEN: Removed
    assert!(unsubscribe.await.expect("join").expect("ok"));
    assert_eq!(page.subscription_count().await, 0);
}

/// **VALUE**: Named APIs map to `<api>_subscribe`/`<api>_unsubscribe`; explicit
/// ones are used as given.
#[tokio::test]
async fn given_explicit_api_when_subscribing_then_custom_method_used() {
    let (page, mut relay) = provider();

    let call = tokio::spawn({
        let page = page.clone();
        async move {
            page.subscribe(
                SubscriptionApi::Explicit {
                    subscribe: "parity_subscribe".to_string(),
                    unsubscribe: "parity_unsubscribe".to_string(),
                    subscription: "parity_subscription".to_string(),
                },
                |_| {},
                vec![json!("eth_getBalance")],
            )
            .await
        }
    });
    let (id, payload, _) = relay.next_request().await;
    assert_eq!(payload["method"], json!("parity_subscribe"));
    relay.answer(id, json!(5)).await;

    assert_eq!(
        call.await.expect("join").expect("ok"),
        SubscriptionId::Number(5)
    );
}

/// **VALUE**: An `UNINITIALIZED` response marks the provider disconnected,
/// fires close listeners once and drops subscriptions.
///
/// **BUG THIS CATCHES**: Would catch listeners firing on every failed request,
/// or stale subscriptions surviving a lost connection.
#[tokio::test]
async fn given_subscription_when_uninitialized_then_closed_once_and_purged() {
    // GIVEN: One registered subscription and a close listener
    let (page, mut relay) = provider();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    page.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .await;

    let subscribe = tokio::spawn({
        let page = page.clone();
        async move { page.subscribe("eth", |_| {}, vec![json!("logs")]).await }
    });
    let (id, _, _) = relay.next_request().await;
    relay.answer(id, json!("0x1")).await;
    subscribe.await.expect("join").expect("subscribed");
    assert_eq!(page.subscription_count().await, 1);

    // WHEN: Two calls come back UNINITIALIZED
    for _ in 0..2 {
        let call = tokio::spawn({
            let page = page.clone();
            async move { page.execute("eth_blockNumber", vec![]).await }
        });
        let (id, _, _) = relay.next_request().await;
        relay.fail(id, ErrorCode::Uninitialized).await;
        assert!(call.await.expect("join").expect_err("failed").is_uninitialized());
    }

    // THEN: Disconnected, one close notification, no subscriptions
    assert!(!page.is_connected());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(page.subscription_count().await, 0);

    // WHEN: A status update reports the connection back
    relay.send(RelayMessage::Status { connected: true }).await;

    // THEN: Connected again
    eventually("reconnected", || async { page.is_connected() }).await;
}

/// **VALUE**: When the relay goes away every pending caller is released.
#[tokio::test]
async fn given_pending_request_when_relay_closes_then_uninitialized() {
    let (page, mut relay) = provider();
    let call = tokio::spawn({
        let page = page.clone();
        async move { page.execute("eth_blockNumber", vec![]).await }
    });
    relay.next_request().await;

    drop(relay);

    let error = call.await.expect("join").expect_err("relay gone");
    assert!(error.is_uninitialized());
    assert!(!page.is_connected());

    // THEN: New calls fail immediately
    let error = page.execute("eth_blockNumber", vec![]).await.expect_err("closed");
    assert!(error.is_uninitialized());
}

/// **VALUE**: `send` forwards a raw payload under the provider's own id.
#[tokio::test]
async fn given_raw_payload_when_sent_then_id_replaced_and_raw_response_returned() {
    let (page, mut relay) = provider();

    let call = tokio::spawn({
        let page = page.clone();
        async move {
            page.send(json!({ "jsonrpc": "2.0", "id": "page-chosen", "method": "net_version", "params": [] }))
                .await
        }
    });
    let (id, payload, _) = relay.next_request().await;
    assert_eq!(payload["id"], json!(id));
    assert_eq!(payload["method"], json!("net_version"));
    relay.answer(id, json!("1")).await;

    let response = call.await.expect("join").expect("ok");
    assert_eq!(response["result"], json!("1"));

    let error = page.send(json!([1, 2])).await.expect_err("not an object");
    assert!(matches!(error.to_code(), ErrorCode::InvalidRequest(_)));
}

/// **VALUE**: Accounts are retried until the relay can answer.
#[tokio::test]
async fn given_uninitialized_accounts_when_retrying_then_eventually_returned() {
    let (page, mut relay) = provider();

    let lookup = tokio::spawn({
        let page = page.clone();
        async move { page.accounts_with_retry().await }
    });

    // First attempt fails, the retry succeeds
    for response in [
        AccountsResponse::failed(ErrorCode::Uninitialized),
        AccountsResponse::ok(vec!["0xabc".to_string()]),
    ] {
        match timeout(Duration::from_secs(5), relay.from_page.recv())
            .await
            .expect("in time")
            .expect("open")
        {
            PageMessage::AccountsRequest { id } => {
                relay.send(RelayMessage::AccountsResponse { id, response }).await
            }
            other => panic!("expected accounts request, got {other:?}"),
        }
    }

    let accounts = lookup.await.expect("join");
    assert_eq!(accounts, vec!["0xabc".to_string()]);
    assert_eq!(page.coinbase().await.as_deref(), Some("0xabc"));
}

/// **VALUE**: Panel messages from the relay are reflected on the page.
#[tokio::test]
async fn given_panel_messages_when_received_then_visibility_tracked() {
    let (page, relay) = provider();
    assert!(!page.panel_visible());

    relay.send(RelayMessage::Panel { visible: true }).await;
    eventually("panel visible", || async { page.panel_visible() }).await;

    relay.send(RelayMessage::Panel { visible: false }).await;
    eventually("panel hidden", || async { !page.panel_visible() }).await;
}
