use crate::proto::SubscriptionId;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Receives the `result` of every notification for one subscription.
pub type NotificationCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Which RPC namespace a subscription belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionApi {
    /// `eth` expands to `eth_subscribe`, `eth_unsubscribe`, `eth_subscription`.
    Named(String),
    Explicit {
        subscribe: String,
        unsubscribe: String,
        subscription: String,
    },
}

impl SubscriptionApi {
    pub fn named(api: impl Into<String>) -> Self {
        SubscriptionApi::Named(api.into())
    }

    pub fn methods(&self) -> SubscriptionMethods {
        match self {
            SubscriptionApi::Named(api) => SubscriptionMethods {
                subscribe: format!("{api}_subscribe"),
                unsubscribe: format!("{api}_unsubscribe"),
                subscription: format!("{api}_subscription"),
            },
            SubscriptionApi::Explicit {
                subscribe,
                unsubscribe,
                subscription,
            } => SubscriptionMethods {
                subscribe: subscribe.clone(),
                unsubscribe: unsubscribe.clone(),
                subscription: subscription.clone(),
            },
        }
    }
}

impl From<&str> for SubscriptionApi {
    fn from(api: &str) -> Self {
        SubscriptionApi::named(api)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMethods {
    pub subscribe: String,
    pub unsubscribe: String,
    /// Method name carried by notifications.
    pub subscription: String,
}

/// A live registration, keyed by the node's subscription id.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) methods: SubscriptionMethods,
    pub(crate) callback: NotificationCallback,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}
