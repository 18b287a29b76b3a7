use crate::provider::{SubscriptionApi, SubscriptionMethods};

#[test]
fn given_named_api_when_deriving_methods_then_uses_convention() {
    // GIVEN: The conventional "eth" namespace
    let api = SubscriptionApi::from("eth");

    // WHEN: Deriving the method triple
    let methods = api.methods();

    // THEN: <api>_subscribe / _unsubscribe / _subscription
    assert_eq!(
        methods,
        SubscriptionMethods {
            subscribe: "eth_subscribe".to_string(),
            unsubscribe: "eth_unsubscribe".to_string(),
            subscription: "eth_subscription".to_string(),
        }
    );
}

/// **VALUE**: An explicit descriptor is used verbatim.
///
/// **BUG THIS CATCHES**: Would catch the convention being applied on top of explicit
/// names (e.g. `parity_subscribe_subscribe`).
#[test]
fn given_explicit_api_when_deriving_methods_then_names_are_kept() {
    let api = SubscriptionApi::Explicit {
        subscribe: "parity_subscribe".to_string(),
        unsubscribe: "parity_unsubscribe".to_string(),
        subscription: "parity_subscription".to_string(),
    };

    let methods = api.methods();

    assert_eq!(methods.subscribe, "parity_subscribe");
    assert_eq!(methods.unsubscribe, "parity_unsubscribe");
    assert_eq!(methods.subscription, "parity_subscription");
}
