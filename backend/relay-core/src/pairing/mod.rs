//! Token acquisition and re-pairing.
//!
//! [`PairingMachine`] is pure: every transition returns the side effects as
//! [`PairingAction`]s and the session transport performs them. Timers, HTTP
//! probes and UI surfaces never live inside the machine.

pub mod launcher;
pub mod probe;
pub mod retry;

pub use launcher::{ProcessLauncher, UiLauncher, UiSurface, pairing_url};
pub use probe::probe_ui;
pub use retry::{RetrySchedule, retry_timeout};

use common::PairingToken;

use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairingState {
    /// Nothing started yet.
    NoToken,
    /// Probing the node UI, or waiting for the opened UI to deliver a token.
    FetchingUi,
    /// Token in hand, connection being (re)opened with it.
    TokenReceived,
    /// Last probe failed, a retry is scheduled.
    FetchFailed,
    Paired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairingAction {
    OpenConnection(PairingToken),
    CloseConnection,
    ProbeUi,
    OpenUiSurface,
    CloseUiSurface,
    PersistToken {
        token: PairingToken,
        session_seed: Option<String>,
    },
    ForgetToken,
    ScheduleRetry(Duration),
    CancelRetry,
}

#[derive(Debug)]
pub struct PairingMachine {
    state: PairingState,
    retries: u32,
    token: Option<PairingToken>,
    session_seed: Option<String>,
    surface_open: bool,
}

impl Default for PairingMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingMachine {
    pub fn new() -> Self {
        Self {
            state: PairingState::NoToken,
            retries: 0,
            token: None,
            session_seed: None,
            surface_open: false,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Consecutive failed UI probes.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn token(&self) -> Option<&PairingToken> {
        self.token.as_ref()
    }

    pub fn session_seed(&self) -> Option<&str> {
        self.session_seed.as_deref()
    }

    /// Begin with the token from the config store, if any.
    pub fn start(
        &mut self,
        stored: Option<PairingToken>,
        session_seed: Option<String>,
    ) -> Vec<PairingAction> {
        match stored {
            Some(token) => {
                info!("Stored pairing token {} found", token.fingerprint());
                self.token = Some(token.clone());
                self.session_seed = session_seed;
                self.transition(PairingState::Paired);
                vec![PairingAction::OpenConnection(token)]
            }
            None => {
                self.transition(PairingState::FetchingUi);
                vec![PairingAction::ProbeUi]
            }
        }
    }

    pub fn on_ui_reachable(&mut self) -> Vec<PairingAction> {
        if self.state != PairingState::FetchingUi {
            return Vec::new();
        }

        self.retries = 0;
        if self.surface_open {
            return Vec::new();
        }
        self.surface_open = true;
        vec![PairingAction::OpenUiSurface]
    }

    pub fn on_ui_unreachable(&mut self) -> Vec<PairingAction> {
        if self.state != PairingState::FetchingUi {
            return Vec::new();
        }

        self.retries = self.retries.saturating_add(1);
        self.transition(PairingState::FetchFailed);
        vec![PairingAction::ScheduleRetry(retry_timeout(self.retries))]
    }

    /// The launcher failed to show the UI; treated like an unreachable node.
    pub fn on_surface_failed(&mut self) -> Vec<PairingAction> {
        self.surface_open = false;
        self.on_ui_unreachable()
    }

    pub fn on_retry_elapsed(&mut self) -> Vec<PairingAction> {
        if self.state != PairingState::FetchFailed {
            return Vec::new();
        }

        self.transition(PairingState::FetchingUi);
        vec![PairingAction::ProbeUi]
    }

    /// A token (and seed) arrived from the pairing UI.
    ///
    /// The identical credential while already paired only reconnects.
    pub fn on_token(
        &mut self,
        token: PairingToken,
        session_seed: Option<String>,
    ) -> Vec<PairingAction> {
        if self.state == PairingState::Paired
            && self.token.as_ref() == Some(&token)
            && self.session_seed == session_seed
        {
            debug!("Same pairing token delivered again, reconnecting");
            return vec![
                PairingAction::CloseConnection,
                PairingAction::OpenConnection(token),
            ];
        }

        let mut actions = vec![
            PairingAction::CancelRetry,
            PairingAction::PersistToken {
                token: token.clone(),
                session_seed: session_seed.clone(),
            },
        ];
        if self.surface_open {
            self.surface_open = false;
            actions.push(PairingAction::CloseUiSurface);
        }
        actions.push(PairingAction::CloseConnection);
        actions.push(PairingAction::OpenConnection(token.clone()));

        self.retries = 0;
        self.token = Some(token);
        self.session_seed = session_seed;
        self.transition(PairingState::TokenReceived);
        actions
    }

    /// The node accepted the connection opened with the current token.
    pub fn on_connection_opened(&mut self) -> Vec<PairingAction> {
        if self.state == PairingState::TokenReceived {
            self.transition(PairingState::Paired);
        }
        Vec::new()
    }

    /// The node refused the current token: forget it and pair again.
    pub fn on_token_rejected(&mut self) -> Vec<PairingAction> {
        if self.token.is_none() {
            return Vec::new();
        }

        self.token = None;
        self.session_seed = None;
        self.transition(PairingState::FetchingUi);
        vec![
            PairingAction::CancelRetry,
            PairingAction::CloseConnection,
            PairingAction::ForgetToken,
            PairingAction::ProbeUi,
        ]
    }

    fn transition(&mut self, next: PairingState) {
        if self.state != next {
            info!("Pairing: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
