// Versioned items and the max-version comparison used by the quorum
// coordinator when reconciling replica votes. A bare i64 is used for the
// tie-break key (the replying node's id) rather than depending on
// submerge-net's NodeID, so this crate stays a leaf.

use serde::{Deserialize, Serialize};

#[cfg(test)]
use test_log::test;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VersionedItem {
    pub value: String,
    pub version: u64,
}

impl VersionedItem {
    pub fn new(value: impl Into<String>, version: u64) -> Self {
        Self {
            value: value.into(),
            version,
        }
    }
}

/// A single replica's answer to a `ReadRequest`: the replying node's id and
/// its (possibly absent) item for the key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Vote {
    pub from: i64,
    pub item: Option<VersionedItem>,
}

/// Reconciles a set of votes into the value the coordinator should surface.
/// Picks the vote with the maximum version; ties break on the greater
/// `from` id, which is arbitrary but deterministic across replays of the
/// same vote set. Returns `None` only when every vote was `None`.
pub fn latest(votes: &[Vote]) -> Option<VersionedItem> {
    votes
        .iter()
        .filter_map(|v| v.item.as_ref().map(|item| (v.from, item)))
        .max_by(|(a_from, a_item), (b_from, b_item)| {
            a_item
                .version
                .cmp(&b_item.version)
                .then(a_from.cmp(b_from))
        })
        .map(|(_, item)| item.clone())
}

/// The version a coordinator must assign on update: one past the highest
/// version seen in the pre-write read quorum, or 1 if every vote was `None`.
pub fn next_version(votes: &[Vote]) -> u64 {
    votes
        .iter()
        .filter_map(|v| v.item.as_ref().map(|item| item.version))
        .max()
        .map(|v| v + 1)
        .unwrap_or(1)
}
