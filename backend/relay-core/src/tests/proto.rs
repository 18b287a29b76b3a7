// Unit tests for the cross-process message catalog

use crate::error::TransportError;
use crate::proto::{
    AccountsResponse, ErrorCode, PageMessage, RelayMessage, RequestKind, RpcResponse, SubscriptionId, decode,
    encode, rpc_call, rpc_result,
};

use serde_json::{Value, json};

/// **VALUE**: A plain request without `kind` decodes as a call.
///
/// **WHY THIS MATTERS**: Pages that predate subscriptions send `{type, id, payload}` only;
/// they must keep working.
#[test]
fn given_request_without_kind_when_decoded_then_defaults_to_call() {
    // GIVEN: A minimal request frame
    let frame = r#"{"type":"request","id":7,"payload":{"jsonrpc":"2.0","id":7,"method":"eth_blockNumber","params":[]}}"#;

    // WHEN: Decoding
    let message: PageMessage = decode(frame).expect("valid frame");

    // THEN: Call kind, payload untouched
    match message {
        PageMessage::Request { id, payload, kind } => {
            assert_eq!(id, 7);
            assert_eq!(kind, RequestKind::Call);
            assert_eq!(payload["method"], "eth_blockNumber");
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn given_unsubscribe_request_when_decoded_then_carries_subscription_id() {
    let frame = r#"{"type":"request","id":3,"payload":{},"kind":{"type":"unsubscribe","subscription":"0x1f"}}"#;

    let message: PageMessage = decode(frame).expect("valid frame");

    assert_eq!(
        message,
        PageMessage::Request {
            id: 3,
            payload: json!({}),
            kind: RequestKind::Unsubscribe {
                subscription: SubscriptionId::Text("0x1f".to_string()),
            },
        }
    );
}

/// **VALUE**: Account lookups carry an id the relay echoes back.
#[test]
fn given_accounts_request_when_answered_then_response_echoes_id() {
    // GIVEN: An accounts request frame
    let request: PageMessage = decode(r#"{"type":"accounts_request","id":12}"#).expect("valid");
    let PageMessage::AccountsRequest { id } = request else {
        panic!("unexpected message {request:?}");
    };

    // WHEN: Encoding the answer
    let frame = encode(&RelayMessage::AccountsResponse {
        id,
        response: AccountsResponse::ok(vec!["0xabc".to_string()]),
    })
    .expect("encodes");

    // THEN: Same id, answer nested under `response`
    let value: Value = serde_json::from_str(&frame).expect("json");
    assert_eq!(value["type"], "accounts_response");
    assert_eq!(value["id"], 12);
    assert_eq!(value["response"]["payload"], json!(["0xabc"]));
}

#[test]
fn given_token_frame_when_decoded_then_seed_optional() {
    let with_seed: PageMessage =
        decode(r#"{"type":"token","token":"abc","session_seed":"s1"}"#).expect("valid");
    let without_seed: PageMessage = decode(r#"{"type":"token","token":"abc"}"#).expect("valid");

    assert_eq!(
        with_seed,
        PageMessage::Token {
            token: "abc".to_string(),
            session_seed: Some("s1".to_string()),
        }
    );
    assert_eq!(
        without_seed,
        PageMessage::Token {
            token: "abc".to_string(),
            session_seed: None,
        }
    );
}

/// **VALUE**: Unknown message types are rejected at the channel boundary.
///
/// **BUG THIS CATCHES**: Would catch a catch-all variant sneaking in, which would bring
/// back string dispatch further down.
#[test]
fn given_unknown_type_when_decoded_then_malformed_error() {
    let result: Result<PageMessage, TransportError> = decode(r#"{"type":"shutdown"}"#);

    let err = result.expect_err("unknown type must fail");
    assert_eq!(err.error_category(), "malformed");
}

#[test]
fn given_uninitialized_response_when_encoded_then_uses_well_known_code() {
    let message = RelayMessage::Response(RpcResponse::failed(4, ErrorCode::Uninitialized));

    let text = encode(&message).expect("encodable");
    let value: Value = serde_json::from_str(&text).expect("json");

    assert_eq!(value["type"], "response");
    assert_eq!(value["id"], 4);
    assert_eq!(value["err"], "UNINITIALIZED");
    assert!(value["payload"].is_null());
}

#[test]
fn given_relay_message_when_round_tripped_then_equal() {
    let message = RelayMessage::Panel { visible: true };

    let decoded: RelayMessage = decode(&encode(&message).expect("encodable")).expect("decodable");

    assert_eq!(decoded, message);
}

#[test]
fn given_numeric_and_text_results_when_extracting_subscription_id_then_both_supported() {
    assert_eq!(
        SubscriptionId::from_value(&json!(12)),
        Some(SubscriptionId::Number(12))
    );
    assert_eq!(
        SubscriptionId::from_value(&json!("0xab")),
        Some(SubscriptionId::Text("0xab".to_string()))
    );
    assert_eq!(SubscriptionId::from_value(&json!({"id": 1})), None);
}

#[test]
fn given_rpc_call_when_built_then_is_jsonrpc_two() {
    let call = rpc_call(9, "eth_getBalance", vec![json!("0x1"), json!("latest")]);

    assert_eq!(call["jsonrpc"], "2.0");
    assert_eq!(call["id"], 9);
    assert_eq!(call["method"], "eth_getBalance");
    assert_eq!(call["params"], json!(["0x1", "latest"]));
}

/// **VALUE**: Node errors become `Rpc` errors with the node's message.
///
/// **WHY THIS MATTERS**: These must map to a generic RPC failure, never to
/// UNINITIALIZED, or the relay would tear its panel down on a reverted call.
#[test]
fn given_error_response_when_splitting_then_rpc_error_with_message() {
    // GIVEN: A JSON-RPC error response
    let response = json!({"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}});

    // WHEN: Splitting
    let err = rpc_result(response).expect_err("error response");

    // THEN: Rpc code carrying the message
    assert_eq!(err.to_code(), ErrorCode::Rpc("execution reverted".to_string()));
}

#[test]
fn given_result_response_when_splitting_then_result_returned() {
    let response = json!({"jsonrpc":"2.0","id":1,"result":"0x10","error":null});

    assert_eq!(rpc_result(response).expect("result"), json!("0x10"));
}

#[test]
fn given_transport_errors_when_mapped_to_codes_then_only_unavailability_is_uninitialized() {
    assert_eq!(
        TransportError::uninitialized("x").to_code(),
        ErrorCode::Uninitialized
    );
    assert_eq!(TransportError::closed("x").to_code(), ErrorCode::Uninitialized);
    assert!(matches!(
        TransportError::timeout(1, std::time::Duration::from_secs(1)).to_code(),
        ErrorCode::Rpc(_)
    ));
    assert_eq!(
        TransportError::malformed("bad").to_code(),
        ErrorCode::InvalidRequest("bad".to_string())
    );
}
