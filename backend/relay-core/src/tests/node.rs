// Unit tests for node call bookkeeping

use crate::error::TransportError;
use crate::node::CallRoute;
use crate::node::driver::{PendingCall, prune_abandoned};

use std::collections::HashMap;

use serde_json::{Value, json};
use tokio::sync::oneshot;

fn call(caller_id: Value) -> (PendingCall, oneshot::Receiver<Result<Value, TransportError>>) {
    let (reply, answer) = oneshot::channel();
    let call = PendingCall {
        caller_id,
        route: CallRoute::Plain,
        reply,
    };
    (call, answer)
}

/// **VALUE**: Calls whose caller gave up do not accumulate on a long-lived socket.
///
/// **BUG THIS CATCHES**: A node that never answers (or answers after the caller's
/// window) would otherwise grow the pending table for the life of the connection.
#[test]
fn given_abandoned_calls_when_pruned_then_only_waiting_calls_remain() {
    // GIVEN: Three pending calls, two of whose callers have gone away
    let mut pending = HashMap::new();
    let (waiting, mut answer) = call(json!(1));
    let (gone, dropped) = call(json!(2));
    let (also_gone, also_dropped) = call(json!(3));
    pending.insert(10, waiting);
    pending.insert(11, gone);
    pending.insert(12, also_gone);
    drop(dropped);
    drop(also_dropped);

    // WHEN: Pruning
    let removed = prune_abandoned(&mut pending);

    // THEN: Only the live call is kept, and it can still be answered
    assert_eq!(removed, 2);
    assert_eq!(pending.len(), 1);
    let live = pending.remove(&10).expect("live call kept");
    assert_eq!(live.caller_id, json!(1));
    live.reply.send(Ok(json!("done"))).expect("caller still waiting");
    assert_eq!(answer.try_recv().expect("answered").expect("ok"), json!("done"));
}

#[test]
fn given_no_abandoned_calls_when_pruned_then_nothing_removed() {
    let mut pending = HashMap::new();
    let (waiting, _answer) = call(json!("a"));
    pending.insert(1, waiting);

    assert_eq!(prune_abandoned(&mut pending), 0);
    assert_eq!(pending.len(), 1);
}
