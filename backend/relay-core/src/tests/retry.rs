// Unit tests for the shared retry schedule

use crate::pairing::retry::{RETRY_BASE, RETRY_CAP, RetrySchedule, retry_timeout};

use backoff::backoff::Backoff;

/// **VALUE**: Verifies the schedule never shrinks from one retry to the next.
///
/// **WHY THIS MATTERS**: Both the pairing loop and the page accounts loop rely on the
/// delay growing (or staying flat at the cap) so a dead node is not hammered.
///
/// **BUG THIS CATCHES**: Would catch an overflow in the doubling that wraps to a small
/// delay after many retries.
#[test]
fn given_increasing_retry_counts_when_computing_timeout_then_delay_never_decreases() {
    // GIVEN: A long run of consecutive failures
    let delays: Vec<_> = (0..100).map(retry_timeout).collect();

    // THEN: Every delay is at least the previous one
    for pair in delays.windows(2) {
        assert!(pair[1] >= pair[0], "{:?} < {:?}", pair[1], pair[0]);
    }
}

#[test]
fn given_first_retries_when_computing_timeout_then_doubles_from_base() {
    assert_eq!(retry_timeout(0), RETRY_BASE);
    assert_eq!(retry_timeout(1), RETRY_BASE * 2);
    assert_eq!(retry_timeout(2), RETRY_BASE * 4);
    assert_eq!(retry_timeout(3), RETRY_BASE * 8);
}

#[test]
fn given_huge_retry_count_when_computing_timeout_then_capped() {
    assert_eq!(retry_timeout(20), RETRY_CAP);
    assert_eq!(retry_timeout(u32::MAX), RETRY_CAP);
}

/// **VALUE**: The `Backoff` adapter yields exactly the `retry_timeout` sequence.
///
/// **BUG THIS CATCHES**: Would catch the adapter and the function drifting apart, which
/// would make pairing and the page provider back off on different schedules.
#[test]
fn given_retry_schedule_when_polled_then_matches_retry_timeout_and_resets() {
    // GIVEN: A fresh schedule
    let mut schedule = RetrySchedule::new();

    // WHEN: Polling three times
    let polled: Vec<_> = (0..3).filter_map(|_| schedule.next_backoff()).collect();

    // THEN: Same delays as retry_timeout(1..=3)
    assert_eq!(polled, vec![retry_timeout(1), retry_timeout(2), retry_timeout(3)]);
    assert_eq!(schedule.retries(), 3);

    // WHEN: Reset
    schedule.reset();

    // THEN: Starts over
    assert_eq!(schedule.retries(), 0);
    assert_eq!(schedule.next_backoff(), Some(retry_timeout(1)));
}
