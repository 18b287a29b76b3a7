//! Cross-process message catalog.
//!
//! Every channel carries exactly one closed enum, decoded once at the channel
//! boundary. Downstream code matches on variants and never inspects a
//! string `type` field.
//!
//! | channel | enum |
//! |---|---|
//! | page -> relay | [`PageMessage`] |
//! | relay -> session transport | [`PortRequest`] |
//! | session transport -> relay | [`PortMessage`] |
//! | relay -> page | [`RelayMessage`] |
//!
//! JSON-RPC payloads travel as opaque [`Value`]s. Only the node connection
//! looks inside them.

use crate::JSONRPC_VERSION;
use crate::error::TransportError;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Correlation id assigned by the page provider, echoed by every hop.
pub type RequestId = u64;

/// Account identifier as returned by the node.
pub type AccountId = String;

/// Error codes visible to the page.
///
/// `UNINITIALIZED` is the only code the relay reacts to; everything else is
/// an ordinary RPC failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Uninitialized,
    Rpc(String),
    InvalidRequest(String),
}

impl ErrorCode {
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, ErrorCode::Uninitialized)
    }
}

/// Server-assigned subscription id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionId {
    Number(u64),
    Text(String),
}

impl SubscriptionId {
    /// Extract an id from a subscribe call result.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(SubscriptionId::Text(text.clone())),
            Value::Number(number) => number.as_u64().map(SubscriptionId::Number),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            SubscriptionId::Number(number) => json!(number),
            SubscriptionId::Text(text) => json!(text),
        }
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionId::Number(number) => write!(f, "{number}"),
            SubscriptionId::Text(text) => write!(f, "{text}"),
        }
    }
}

/// What a request does to the subscription table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    #[default]
    Call,
    Subscribe,
    Unsubscribe { subscription: SubscriptionId },
}

/// Page -> relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageMessage {
    Request {
        id: RequestId,
        payload: Value,
        #[serde(default)]
        kind: RequestKind,
    },
    AccountsRequest {
        id: RequestId,
    },
    Token {
        token: String,
        #[serde(default)]
        session_seed: Option<String>,
    },
}

/// Relay -> session transport. The page request plus the caller origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PortRequest {
    pub id: RequestId,
    pub payload: Value,
    pub kind: RequestKind,
    pub origin: String,
}

/// Outcome of one request, keyed by the page's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    pub err: Option<ErrorCode>,
    pub payload: Option<Value>,
}

impl RpcResponse {
    pub fn ok(id: RequestId, payload: Value) -> Self {
        Self {
            id,
            err: None,
            payload: Some(payload),
        }
    }

    pub fn failed(id: RequestId, err: ErrorCode) -> Self {
        Self {
            id,
            err: Some(err),
            payload: None,
        }
    }
}

/// Push message for a standing subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subscription: SubscriptionId,
    pub method: String,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountsResponse {
    pub err: Option<ErrorCode>,
    pub payload: Option<Vec<AccountId>>,
}

impl AccountsResponse {
    pub fn ok(accounts: Vec<AccountId>) -> Self {
        Self {
            err: None,
            payload: Some(accounts),
        }
    }

    pub fn failed(err: ErrorCode) -> Self {
        Self {
            err: Some(err),
            payload: None,
        }
    }
}

/// Session transport -> relay.
#[derive(Debug, Clone, PartialEq)]
pub enum PortMessage {
    Response(RpcResponse),
    Notification(Notification),
    Status { connected: bool },
}

/// Relay -> page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Response(RpcResponse),
    Notification(Notification),
    Status { connected: bool },
    /// Answer to the `AccountsRequest` carrying the same `id`.
    AccountsResponse {
        id: RequestId,
        response: AccountsResponse,
    },
    Panel { visible: bool },
}

impl From<PortMessage> for RelayMessage {
    fn from(message: PortMessage) -> Self {
        match message {
            PortMessage::Response(response) => RelayMessage::Response(response),
            PortMessage::Notification(notification) => RelayMessage::Notification(notification),
            PortMessage::Status { connected } => RelayMessage::Status { connected },
        }
    }
}

/// Decode one frame. Failures are [`TransportError::MalformedMessage`].
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, TransportError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, TransportError> {
    Ok(serde_json::to_string(message)?)
}

/// Build a JSON-RPC 2.0 call object.
pub fn rpc_call(id: u64, method: &str, params: Vec<Value>) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Split a JSON-RPC response object into its result or error.
pub fn rpc_result(response: Value) -> Result<Value, TransportError> {
    match response {
        Value::Object(mut object) => {
            if let Some(error) = object.remove("error").filter(|e| !e.is_null()) {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(TransportError::rpc(message));
            }
            Ok(object.remove("result").unwrap_or(Value::Null))
        }
        other => Err(TransportError::malformed(format!(
            "expected JSON-RPC response object, got {other}"
        ))),
    }
}
