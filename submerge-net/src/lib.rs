//! Node identity, ring topology, the peer message vocabulary, and the
//! transports that carry it. Kept free of any dispatch or membership logic
//! so that `submerge-txn` and `submerge` can both depend on it without a
//! cycle.

pub mod client;
pub mod message;
pub mod ring;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node's identity on the ring. Non-negative by convention, unique across
/// the realm, assigned at launch and never reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeID(pub i64);

impl std::fmt::Display for NodeID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque, resolvable address for a peer. Handles may go stale (a node
/// restarts and rebinds); `ReJoin` overwrites the registry entry for the id
/// it names. Callers must always resolve by id at send time, never cache
/// a `PeerHandle` independently of the registry.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum PeerHandle {
    /// In-process channel transport. The id alone is enough; the transport
    /// keeps its own directory of live senders keyed by id.
    Channel,
    /// TCP transport, addressed by socket address.
    Tcp(std::net::SocketAddr),
}

pub type NodeRegistry = BTreeMap<NodeID, PeerHandle>;
