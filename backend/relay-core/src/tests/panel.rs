use crate::proto::ErrorCode;
use crate::relay::PanelState;

/// **VALUE**: A normal response shows the panel exactly once.
///
/// **BUG THIS CATCHES**: Would catch the relay emitting a show signal for every
/// response, which re-injects the UI on each call.
#[test]
fn given_hidden_panel_when_successful_responses_arrive_then_shown_once() {
    // GIVEN: A fresh page
    let mut panel = PanelState::new();

    // WHEN: Two successful responses
    let first = panel.on_response(None);
    let second = panel.on_response(None);

    // THEN: Only the first one changes visibility
    assert_eq!(first, Some(true));
    assert_eq!(second, None);
    assert!(panel.is_visible());
}

#[test]
fn given_visible_panel_when_uninitialized_arrives_then_hidden() {
    let mut panel = PanelState::new();
    panel.on_response(None);

    assert_eq!(panel.on_response(Some(&ErrorCode::Uninitialized)), Some(false));
    assert!(!panel.is_visible());
}

/// **VALUE**: Ordinary RPC failures never touch the panel.
///
/// **WHY THIS MATTERS**: A reverted call is still a working connection; tearing the UI
/// down for it would make the panel flicker on every failed transaction.
#[test]
fn given_visible_panel_when_rpc_error_arrives_then_no_change() {
    // GIVEN: A visible panel
    let mut panel = PanelState::new();
    panel.on_response(None);

    // WHEN: A generic RPC error and an invalid request error
    let rpc = panel.on_response(Some(&ErrorCode::Rpc("execution reverted".to_string())));
    let invalid = panel.on_response(Some(&ErrorCode::InvalidRequest("bad".to_string())));

    // THEN: Still visible, no signal
    assert_eq!(rpc, None);
    assert_eq!(invalid, None);
    assert!(panel.is_visible());
}

#[test]
fn given_hidden_panel_when_uninitialized_arrives_then_no_signal() {
    let mut panel = PanelState::new();
    assert_eq!(panel.on_response(Some(&ErrorCode::Uninitialized)), None);
}
