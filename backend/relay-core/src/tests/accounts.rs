// Unit tests for the session transport accounts cache

use crate::error::TransportError;
use crate::proto::{AccountsResponse, ErrorCode};
use crate::transport::{AccountsCache, AccountsLookup};

use tokio::sync::oneshot;

const ORIGIN: &str = "https://dapp.example";

fn accounts(list: &[&str]) -> Vec<String> {
    list.iter().map(|a| a.to_string()).collect()
}

/// **VALUE**: Concurrent misses for one origin share a single fetch.
///
/// **BUG THIS CATCHES**: Would catch each caller starting its own node call, which lets
/// the last one to finish overwrite the cache.
#[test]
fn given_uncached_origin_when_two_lookups_then_one_fetch_answers_both() {
    // GIVEN: An empty cache
    let mut cache = AccountsCache::new();
    let (first_tx, mut first_rx) = oneshot::channel();
    let (second_tx, mut second_rx) = oneshot::channel();

    // WHEN: Two lookups for the same origin before the fetch completes
    let first = cache.lookup(ORIGIN, first_tx);
    let second = cache.lookup(ORIGIN, second_tx);

    // THEN: Only the first starts a fetch
    assert_eq!(first, AccountsLookup::Fetch { epoch: 0 });
    assert_eq!(second, AccountsLookup::Joined);

    // WHEN: The fetch completes
    cache.complete(ORIGIN, 0, Ok(accounts(&["0xabc"])));

    // THEN: Both callers get the same answer and the cache is filled
    let expected = AccountsResponse::ok(accounts(&["0xabc"]));
    assert_eq!(first_rx.try_recv().expect("first answered"), expected);
    assert_eq!(second_rx.try_recv().expect("second answered"), expected);
    assert_eq!(cache.get(ORIGIN), Some(&accounts(&["0xabc"])));
}

#[test]
fn given_cached_origin_when_lookup_then_hit_without_fetch() {
    let mut cache = AccountsCache::new();
    let (tx, _rx) = oneshot::channel();
    cache.lookup(ORIGIN, tx);
    cache.complete(ORIGIN, 0, Ok(accounts(&["0x1"])));

    let (tx, mut rx) = oneshot::channel();
    let lookup = cache.lookup(ORIGIN, tx);

    assert_eq!(lookup, AccountsLookup::Hit);
    assert_eq!(
        rx.try_recv().expect("answered"),
        AccountsResponse::ok(accounts(&["0x1"]))
    );
}

/// **VALUE**: A failed fetch answers its waiters but caches nothing.
///
/// **WHY THIS MATTERS**: Caching an error would pin the page to "no accounts" until the
/// next reconnect.
#[test]
fn given_pending_fetch_when_it_fails_then_waiters_get_error_and_cache_stays_empty() {
    // GIVEN: One pending lookup
    let mut cache = AccountsCache::new();
    let (tx, mut rx) = oneshot::channel();
    cache.lookup(ORIGIN, tx);

    // WHEN: The node call fails
    cache.complete(ORIGIN, 0, Err(TransportError::uninitialized("gone")));

    // THEN: Error forwarded with the UNINITIALIZED code, cache empty
    assert_eq!(
        rx.try_recv().expect("answered"),
        AccountsResponse::failed(ErrorCode::Uninitialized)
    );
    assert!(cache.is_empty());

    // AND: The next lookup starts a fresh fetch
    let (tx, _rx) = oneshot::channel();
    assert_eq!(cache.lookup(ORIGIN, tx), AccountsLookup::Fetch { epoch: 0 });
}

/// **VALUE**: Reconnect clears the cache and lists every previously cached origin once.
///
/// **BUG THIS CATCHES**: Would catch origins being dropped (never refreshed) or listed
/// twice (double fetch) when the node switches networks.
#[test]
fn given_cached_origins_when_reset_then_cache_empty_and_each_origin_listed_once() {
    // GIVEN: Two cached origins
    let mut cache = AccountsCache::new();
    for origin in ["https://a.example", "https://b.example"] {
        let (tx, _rx) = oneshot::channel();
        cache.lookup(origin, tx);
        cache.complete(origin, 0, Ok(accounts(&["0x1"])));
    }

    // WHEN: The connection reopens
    let (epoch, mut origins) = cache.reset();
    origins.sort();

    // THEN: Empty cache, new epoch, both origins to refetch
    assert!(cache.is_empty());
    assert_eq!(epoch, 1);
    assert_eq!(
        origins,
        vec!["https://a.example".to_string(), "https://b.example".to_string()]
    );
}

/// **VALUE**: A fetch started before the reconnect never writes the new epoch's cache.
///
/// **WHY THIS MATTERS**: Its result reflects the old network; writing it would undo
/// the clear that the reconnect just did.
#[test]
fn given_fetch_from_old_epoch_when_it_completes_after_reset_then_dropped() {
    // GIVEN: A fetch in flight when the connection reopens
    let mut cache = AccountsCache::new();
    let (tx, mut rx) = oneshot::channel();
    cache.lookup(ORIGIN, tx);
    let (epoch, origins) = cache.reset();
    assert_eq!(origins, vec![ORIGIN.to_string()]);

    // WHEN: The old fetch completes
    cache.complete(ORIGIN, 0, Ok(accounts(&["0xold"])));

    // THEN: Nothing cached, waiter still waiting
    assert!(cache.get(ORIGIN).is_none());
    assert!(rx.try_recv().is_err());

    // WHEN: The refetch for the new epoch completes
    cache.complete(ORIGIN, epoch, Ok(accounts(&["0xnew"])));

    // THEN: The original waiter gets the fresh answer
    assert_eq!(
        rx.try_recv().expect("answered"),
        AccountsResponse::ok(accounts(&["0xnew"]))
    );
    assert_eq!(cache.get(ORIGIN), Some(&accounts(&["0xnew"])));
}

#[test]
fn given_empty_cache_when_reset_then_nothing_to_refetch() {
    let mut cache = AccountsCache::new();

    let (epoch, origins) = cache.reset();

    assert_eq!(epoch, 1);
    assert!(origins.is_empty());
    assert_eq!(cache.epoch(), 1);
}
