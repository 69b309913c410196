//! The peer message vocabulary (§6). Every variant carries its sender's id;
//! this single enum is what actually goes over the wire, one `rmp-serde`
//! frame per message.

use crate::{NodeID, NodeRegistry};
use serde::{Deserialize, Serialize};
use submerge_vers::VersionedItem;

pub type Record = (i64, VersionedItem);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WireMsg {
    JoinRequest {
        sender: NodeID,
    },
    NodesList {
        sender: NodeID,
        nodes: NodeRegistry,
    },
    DataRequest {
        sender: NodeID,
    },
    JoinData {
        sender: NodeID,
        records: Vec<Record>,
    },
    Join {
        sender: NodeID,
    },
    ReJoin {
        sender: NodeID,
    },
    Leave {
        sender: NodeID,
    },
    LeaveData {
        sender: NodeID,
        records: Vec<Record>,
    },
    ReadRequest {
        coord: NodeID,
        req_id: i64,
        key: i64,
    },
    ReadResponse {
        replica: NodeID,
        req_id: i64,
        key: i64,
        item: Option<VersionedItem>,
    },
    WriteRequest {
        coord: NodeID,
        req_id: i64,
        key: i64,
        item: VersionedItem,
    },
    /// Delivered by a node's own timer thread back to its own mailbox; never
    /// sent over the wire to another node.
    TimeoutMessage {
        req_id: i64,
    },
}

impl WireMsg {
    pub fn sender(&self) -> Option<NodeID> {
        match self {
            WireMsg::JoinRequest { sender }
            | WireMsg::NodesList { sender, .. }
            | WireMsg::DataRequest { sender }
            | WireMsg::JoinData { sender, .. }
            | WireMsg::Join { sender }
            | WireMsg::ReJoin { sender }
            | WireMsg::Leave { sender }
            | WireMsg::LeaveData { sender, .. } => Some(*sender),
            WireMsg::ReadRequest { coord, .. } => Some(*coord),
            WireMsg::ReadResponse { replica, .. } => Some(*replica),
            WireMsg::WriteRequest { coord, .. } => Some(*coord),
            WireMsg::TimeoutMessage { .. } => None,
        }
    }
}

/// What lands in a node's mailbox: either a peer wire message (including a
/// self-addressed `TimeoutMessage`), or a client request paired with the
/// channel its response must be delivered on.
pub enum Envelope {
    Peer(WireMsg),
    Client(crate::client::ClientRequest, std::sync::mpsc::Sender<crate::client::ClientResponse>),
}
