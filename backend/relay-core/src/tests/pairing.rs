// Unit tests for the pairing state machine

use crate::pairing::{PairingAction, PairingMachine, PairingState, retry_timeout};

use common::PairingToken;

fn token(raw: &str) -> PairingToken {
    PairingToken::parse(raw).expect("valid token")
}

/// **VALUE**: A stored token skips the UI entirely.
///
/// **WHY THIS MATTERS**: Restarting the daemon must not pop a pairing window when the
/// credential is already on disk.
#[test]
fn given_stored_token_when_started_then_paired_and_connection_opened() {
    // GIVEN: A fresh machine
    let mut machine = PairingMachine::new();

    // WHEN: Started with a stored token
    let actions = machine.start(Some(token("stored-token")), Some("seed".to_string()));

    // THEN: Paired straight away, one connection opened
    assert_eq!(machine.state(), PairingState::Paired);
    assert_eq!(actions, vec![PairingAction::OpenConnection(token("stored-token"))]);
    assert_eq!(machine.session_seed(), Some("seed"));
}

#[test]
fn given_no_token_when_started_then_probes_ui() {
    let mut machine = PairingMachine::new();

    let actions = machine.start(None, None);

    assert_eq!(machine.state(), PairingState::FetchingUi);
    assert_eq!(actions, vec![PairingAction::ProbeUi]);
}

/// **VALUE**: Full happy path from nothing to paired.
///
/// **BUG THIS CATCHES**: Would catch the token path forgetting to persist the seed, to
/// close the UI surface, or to reset the retry counter after earlier failures.
#[test]
fn given_reachable_ui_when_token_with_seed_delivered_then_paired_with_reset_retries() {
    // GIVEN: No token, one failed probe, then a reachable UI
    let mut machine = PairingMachine::new();
    machine.start(None, None);
    machine.on_ui_unreachable();
    machine.on_retry_elapsed();
    let opened = machine.on_ui_reachable();
    assert_eq!(opened, vec![PairingAction::OpenUiSurface]);

    // WHEN: The UI delivers a token with seed "s1"
    let actions = machine.on_token(token("fresh-token"), Some("s1".to_string()));

    // THEN: Persist, close surface, reconnect with the new token
    assert_eq!(
        actions,
        vec![
            PairingAction::CancelRetry,
            PairingAction::PersistToken {
                token: token("fresh-token"),
                session_seed: Some("s1".to_string()),
            },
            PairingAction::CloseUiSurface,
            PairingAction::CloseConnection,
            PairingAction::OpenConnection(token("fresh-token")),
        ]
    );
    assert_eq!(machine.state(), PairingState::TokenReceived);
    assert_eq!(machine.retries(), 0);

    // WHEN: The connection opens
    machine.on_connection_opened();

    // THEN: Paired
    assert_eq!(machine.state(), PairingState::Paired);
    assert_eq!(machine.token(), Some(&token("fresh-token")));
    assert_eq!(machine.session_seed(), Some("s1"));
}

/// **VALUE**: Three failed probes back off with a non-decreasing delay.
///
/// **WHY THIS MATTERS**: The pairing loop runs forever while the node is down; a
/// shrinking delay would spin.
#[test]
fn given_unreachable_node_when_probed_three_times_then_retries_reach_three_with_backoff() {
    // GIVEN: No token
    let mut machine = PairingMachine::new();
    machine.start(None, None);

    // WHEN: Three consecutive failed probes
    let mut delays = Vec::new();
    for attempt in 1..=3 {
        let actions = machine.on_ui_unreachable();
        assert_eq!(machine.state(), PairingState::FetchFailed);
        match actions.as_slice() {
            [PairingAction::ScheduleRetry(delay)] => delays.push(*delay),
            other => panic!("attempt {attempt}: unexpected actions {other:?}"),
        }
        assert_eq!(machine.on_retry_elapsed(), vec![PairingAction::ProbeUi]);
    }

    // THEN: Counter at 3, delay for attempt 3 >= delay for attempt 2
    assert_eq!(machine.retries(), 3);
    assert!(delays[2] >= delays[1]);
    assert_eq!(delays[2], retry_timeout(3));
}

#[test]
fn given_reachable_ui_after_failures_when_probe_succeeds_then_retries_reset() {
    let mut machine = PairingMachine::new();
    machine.start(None, None);
    machine.on_ui_unreachable();
    machine.on_retry_elapsed();
    assert_eq!(machine.retries(), 1);

    machine.on_ui_reachable();

    assert_eq!(machine.retries(), 0);
    assert_eq!(machine.state(), PairingState::FetchingUi);
}

/// **VALUE**: A token arriving mid-backoff cancels the scheduled retry.
///
/// **BUG THIS CATCHES**: Would catch a dangling retry timer that later re-enters
/// `FetchingUi` and opens a second pairing window after pairing already succeeded.
#[test]
fn given_scheduled_retry_when_token_arrives_then_retry_cancelled_and_late_timer_ignored() {
    // GIVEN: A failed probe with a retry scheduled
    let mut machine = PairingMachine::new();
    machine.start(None, None);
    machine.on_ui_unreachable();

    // WHEN: A token arrives before the timer fires
    let actions = machine.on_token(token("mid-backoff"), None);

    // THEN: The retry is cancelled first, and a late timer is a no-op
    assert_eq!(actions.first(), Some(&PairingAction::CancelRetry));
    assert!(!actions.contains(&PairingAction::CloseUiSurface));
    assert!(machine.on_retry_elapsed().is_empty());
    assert_eq!(machine.state(), PairingState::TokenReceived);
}

/// **VALUE**: Re-delivering the same credential while paired only reconnects.
///
/// **BUG THIS CATCHES**: Would catch redundant config writes every time the paired UI
/// page is reloaded.
#[test]
fn given_paired_when_identical_token_delivered_then_only_reconnects() {
    // GIVEN: Paired with a known token and seed
    let mut machine = PairingMachine::new();
    machine.start(Some(token("same-token")), Some("s1".to_string()));

    // WHEN: The same token and seed arrive again
    let actions = machine.on_token(token("same-token"), Some("s1".to_string()));

    // THEN: Close + open, nothing persisted, still paired
    assert_eq!(
        actions,
        vec![
            PairingAction::CloseConnection,
            PairingAction::OpenConnection(token("same-token")),
        ]
    );
    assert_eq!(machine.state(), PairingState::Paired);
}

#[test]
fn given_paired_when_different_token_delivered_then_persists_new_token() {
    let mut machine = PairingMachine::new();
    machine.start(Some(token("old-token")), None);

    let actions = machine.on_token(token("new-token"), Some("s2".to_string()));

    assert!(actions.contains(&PairingAction::PersistToken {
        token: token("new-token"),
        session_seed: Some("s2".to_string()),
    }));
    assert_eq!(
        actions.last(),
        Some(&PairingAction::OpenConnection(token("new-token")))
    );
}

/// **VALUE**: A token refused by the node sends the machine back to pairing.
///
/// **WHY THIS MATTERS**: A node reset invalidates old tokens; without re-pairing the
/// relay would reconnect with a dead credential forever.
#[test]
fn given_paired_when_token_rejected_then_forgets_token_and_probes_again() {
    // GIVEN: Paired from storage
    let mut machine = PairingMachine::new();
    machine.start(Some(token("revoked")), Some("s1".to_string()));

    // WHEN: The node refuses the token
    let actions = machine.on_token_rejected();

    // THEN: Token dropped everywhere, back to probing
    assert_eq!(
        actions,
        vec![
            PairingAction::CancelRetry,
            PairingAction::CloseConnection,
            PairingAction::ForgetToken,
            PairingAction::ProbeUi,
        ]
    );
    assert_eq!(machine.state(), PairingState::FetchingUi);
    assert!(machine.token().is_none());
    assert!(machine.session_seed().is_none());

    // AND: A second rejection is a no-op
    assert!(machine.on_token_rejected().is_empty());
}

#[test]
fn given_surface_launch_failure_when_reported_then_backs_off_like_unreachable() {
    let mut machine = PairingMachine::new();
    machine.start(None, None);
    machine.on_ui_reachable();

    let actions = machine.on_surface_failed();

    assert_eq!(actions, vec![PairingAction::ScheduleRetry(retry_timeout(1))]);
    assert_eq!(machine.state(), PairingState::FetchFailed);

    // The next reachable probe opens a surface again
    machine.on_retry_elapsed();
    assert_eq!(machine.on_ui_reachable(), vec![PairingAction::OpenUiSurface]);
}

#[test]
fn given_probe_result_in_wrong_state_when_reported_then_ignored() {
    let mut machine = PairingMachine::new();
    machine.start(Some(token("stored")), None);

    assert!(machine.on_ui_reachable().is_empty());
    assert!(machine.on_ui_unreachable().is_empty());
    assert_eq!(machine.state(), PairingState::Paired);
    assert_eq!(machine.retries(), 0);
}
