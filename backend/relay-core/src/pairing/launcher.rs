//! Opening the node UI so the user can approve the pairing.

use crate::error::pairing::PairingError;

use common::ErrorLocation;

use std::panic::Location;
use std::process::Stdio;

use log::{debug, info, warn};
use tokio::process::{Child as TokioChild, Command as TokioCommand};
use url::Url;

/// Opens a UI surface (browser tab, window) showing `url`.
pub trait UiLauncher: Send + Sync {
    fn open(&self, url: &Url) -> Result<Box<dyn UiSurface>, PairingError>;
}

/// A surface opened by a [`UiLauncher`].
pub trait UiSurface: Send + Sync {
    fn close(self: Box<Self>);
}

/// Build `http://<ui>/#/?from=<client id>`.
pub fn pairing_url(ui_url: &Url, client_id: &str) -> Result<Url, PairingError> {
    if client_id.trim().is_empty() {
        return Err(PairingError::Url {
            message: "client id cannot be empty".to_string(),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let mut url = ui_url.clone();
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(Some(&format!("/?from={client_id}")));
    Ok(url)
}

/// Launches the UI by running an opener command (`xdg-open`, `open`, a
/// browser binary) with the URL as its last argument.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace separated command line, e.g. `firefox --new-window`.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl UiLauncher for ProcessLauncher {
    fn open(&self, url: &Url) -> Result<Box<dyn UiSurface>, PairingError> {
        info!("Opening node UI with {}: {url}", self.program);

        let child = TokioCommand::new(&self.program)
            .args(&self.args)
            .arg(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PairingError::Launch {
                message: format!("failed to run {}", self.program),
                location: ErrorLocation::from(Location::caller()),
                source: Box::new(e),
            })?;

        Ok(Box::new(ProcessSurface { child }))
    }
}

struct ProcessSurface {
    child: TokioChild,
}

impl UiSurface for ProcessSurface {
    fn close(mut self: Box<Self>) {
        match self.child.start_kill() {
            Ok(()) => debug!("Pairing UI process stopped"),
            Err(e) => warn!("Pairing UI process already gone: {e}"),
        }
    }
}
