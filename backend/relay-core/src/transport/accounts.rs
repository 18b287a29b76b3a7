//! Per-origin account cache with coalesced fetches.
//!
//! Owned by the session transport actor; never shared. Every connection open
//! starts a new epoch: the cache is cleared, and fetch results tagged with an
//! older epoch are dropped instead of written.

use crate::error::TransportError;
use crate::proto::{AccountId, AccountsResponse};

use std::collections::HashMap;

use log::{debug, trace, warn};
use tokio::sync::oneshot;

pub type AccountsReply = oneshot::Sender<AccountsResponse>;

struct InFlight {
    epoch: u64,
    waiters: Vec<AccountsReply>,
}

/// Outcome of [`AccountsCache::lookup`].
#[derive(Debug, PartialEq, Eq)]
pub enum AccountsLookup {
    /// Answered from the cache.
    Hit,
    /// Attached to a fetch already running for this origin.
    Joined,
    /// Caller must start a fetch and report it with this epoch.
    Fetch { epoch: u64 },
}

#[derive(Default)]
pub struct AccountsCache {
    entries: HashMap<String, Vec<AccountId>>,
    in_flight: HashMap<String, InFlight>,
    epoch: u64,
}

impl AccountsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, origin: &str) -> Option<&Vec<AccountId>> {
        self.entries.get(origin)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<AccountId>> {
        self.entries.clone()
    }

    pub fn lookup(&mut self, origin: &str, reply: AccountsReply) -> AccountsLookup {
        if let Some(accounts) = self.entries.get(origin) {
            trace!("Accounts cache hit for {origin}");
            let _ = reply.send(AccountsResponse::ok(accounts.clone()));
            return AccountsLookup::Hit;
        }

        if let Some(pending) = self.in_flight.get_mut(origin) {
            debug!("Joining in-flight accounts fetch for {origin}");
            pending.waiters.push(reply);
            return AccountsLookup::Joined;
        }

        self.in_flight.insert(
            origin.to_string(),
            InFlight {
                epoch: self.epoch,
                waiters: vec![reply],
            },
        );
        AccountsLookup::Fetch { epoch: self.epoch }
    }

    /// Record a fetch result and answer everyone waiting on it.
    ///
    /// Results from an older epoch are discarded; their waiters were moved to
    /// the fetch started by [`reset`](Self::reset).
    pub fn complete(
        &mut self,
        origin: &str,
        epoch: u64,
        result: Result<Vec<AccountId>, TransportError>,
    ) {
        let current = self
            .in_flight
            .get(origin)
            .is_some_and(|pending| pending.epoch == epoch);
        if !current {
            debug!("Dropping stale accounts result for {origin} (epoch {epoch})");
            return;
        }

        let Some(pending) = self.in_flight.remove(origin) else {
            return;
        };

        let response = match result {
            Ok(accounts) => {
                self.entries.insert(origin.to_string(), accounts.clone());
                AccountsResponse::ok(accounts)
            }
            Err(e) => {
                warn!("Accounts fetch for {origin} failed: {e}");
                AccountsResponse::failed(e.to_code())
            }
        };

        for waiter in pending.waiters {
            let _ = waiter.send(response.clone());
        }
    }

    /// Start a new epoch after the connection (re)opened.
    ///
    /// Clears every entry and returns each origin that must be fetched again:
    /// all previously cached origins plus any whose fetch was still running.
    pub fn reset(&mut self) -> (u64, Vec<String>) {
        self.epoch += 1;
        let epoch = self.epoch;

        let mut origins: Vec<String> = self.entries.drain().map(|(origin, _)| origin).collect();
        for (origin, pending) in self.in_flight.iter_mut() {
            pending.epoch = epoch;
            if !origins.contains(origin) {
                origins.push(origin.clone());
            }
        }
        for origin in &origins {
            self.in_flight
                .entry(origin.clone())
                .or_insert_with(|| InFlight {
                    epoch,
                    waiters: Vec::new(),
                });
        }

        debug!(
            "Accounts cache cleared (epoch {epoch}), refetching {} origin(s)",
            origins.len()
        );
        (epoch, origins)
    }
}
