use crate::error::TransportError;

use std::time::Duration;

use log::{debug, trace};
use reqwest::Client;
use url::Url;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Check whether the node UI answers HTTP at all.
///
/// Any status counts as reachable; only connect and timeout errors do not.
pub async fn probe_ui(client: &Client, ui_url: &Url) -> Result<(), TransportError> {
    trace!("Probing node UI at {ui_url}");

    match client.get(ui_url.clone()).timeout(PROBE_TIMEOUT).send().await {
        Ok(response) => {
            debug!("Node UI answered with {}", response.status());
            Ok(())
        }
        Err(e) => Err(TransportError::pairing_fetch(format!(
            "node UI at {ui_url} unreachable: {e}"
        ))),
    }
}
