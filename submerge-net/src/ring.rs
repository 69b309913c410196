//! Pure functions over the current node-id set. No I/O, no mutable state:
//! every function here is a total function of its (non-empty, where
//! required) input set, so they're trivial to property-test.

use crate::NodeID;
use std::collections::BTreeSet;

/// The smallest id strictly greater than `me`, wrapping to the smallest id
/// in the set if `me` is the maximum. `ids` must contain at least one id
/// other than `me`, or `me` itself if the ring is a singleton.
pub fn successor(ids: &BTreeSet<NodeID>, me: NodeID) -> NodeID {
    assert!(!ids.is_empty(), "successor is undefined on an empty ring");
    ids.range(NodeID(me.0 + 1)..)
        .next()
        .copied()
        .unwrap_or_else(|| *ids.iter().next().expect("checked non-empty above"))
}

/// The N nodes responsible for `key`: walk clockwise from `key` (ids >= key
/// ascending, then wrap through ids < key ascending) and take the first N
/// distinct ids. Returns fewer than N only when `ids.len() < N`.
pub fn owners_of(ids: &BTreeSet<NodeID>, key: i64, n: usize) -> Vec<NodeID> {
    let at_or_after = ids.range(NodeID(key)..).copied();
    let before = ids.range(..NodeID(key)).copied();
    at_or_after.chain(before).take(n.min(ids.len())).collect()
}

/// The N successors of `me` on the ring, excluding `me`, wrapping as
/// needed. Used on leave to find who to hand local state off to. Returns
/// fewer than N if `ids.len() < n + 1`.
pub fn next_replicas_after(ids: &BTreeSet<NodeID>, me: NodeID, n: usize) -> Vec<NodeID> {
    let after = ids.range(NodeID(me.0 + 1)..).copied();
    let wrapped = ids.range(..=me).copied();
    after
        .chain(wrapped)
        .filter(|id| *id != me)
        .take(n.min(ids.len().saturating_sub(1)))
        .collect()
}
