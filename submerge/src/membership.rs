//! The membership state machine (§4.D): startup mode, topology changes,
//! and the purge that follows every join/leave so a node never keeps data
//! it's no longer responsible for.

use crate::dispatcher::NodeActor;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use submerge_base::Result;
use submerge_net::message::WireMsg;
use submerge_net::{ring, NodeID, PeerHandle};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    JoiningWaitingNodes,
    JoiningWaitingData,
    RecoveringWaitingNodes,
    Ready,
}

/// How a node enters the ring. `Join`/`Recover` need one already-known
/// member to bootstrap against; for the TCP transport that's an
/// `(id, addr)` pair (the same shape as one entry of a `NodesList`), for
/// the channel transport the address is unused since `ChannelTransport`
/// resolves purely by id.
#[derive(Clone, Debug)]
pub enum StartupCommand {
    Bootstrap,
    Join { contact_id: NodeID, contact_addr: SocketAddr },
    Recover { contact_id: NodeID, contact_addr: SocketAddr },
}

impl NodeActor {
    /// Runs the one-shot start transition named by `cmd` (§4.D "Start
    /// transitions"). Must be called exactly once, before the mailbox is
    /// pumped.
    pub fn start(&mut self, cmd: StartupCommand) -> Result<()> {
        match cmd {
            StartupCommand::Bootstrap => {
                self.storage.clear()?;
                self.registry.clear();
                self.registry.insert(self.id, self.self_handle.clone());
                self.state = NodeState::Ready;
                info!(node = %self.id, "bootstrapped as sole ring member");
            }
            StartupCommand::Join { contact_id, contact_addr } => {
                self.storage.clear()?;
                self.registry.insert(contact_id, PeerHandle::Tcp(contact_addr));
                self.transport.send(
                    contact_id,
                    &self.registry,
                    WireMsg::JoinRequest { sender: self.id },
                )?;
                self.state = NodeState::JoiningWaitingNodes;
                info!(node = %self.id, contact = %contact_id, "joining via contact");
            }
            StartupCommand::Recover { contact_id, contact_addr } => {
                self.registry.insert(contact_id, PeerHandle::Tcp(contact_addr));
                self.transport.send(
                    contact_id,
                    &self.registry,
                    WireMsg::JoinRequest { sender: self.id },
                )?;
                self.state = NodeState::RecoveringWaitingNodes;
                info!(node = %self.id, contact = %contact_id, "recovering via contact");
            }
        }
        Ok(())
    }

    /// Dispatches one peer message per the §4.D transition table. Messages
    /// not meaningful in the current state are logged and dropped, never
    /// panicked on.
    pub fn handle_peer_message(&mut self, msg: WireMsg) -> Result<()> {
        match (self.state, msg) {
            (NodeState::JoiningWaitingNodes, WireMsg::NodesList { nodes, .. }) => {
                self.registry.extend(nodes);
                let ids = self.node_ids();
                let succ = ring::successor(&ids, self.id);
                self.transport
                    .send(succ, &self.registry, WireMsg::DataRequest { sender: self.id })?;
                self.state = NodeState::JoiningWaitingData;
            }
            (NodeState::JoiningWaitingData, WireMsg::JoinData { records, .. }) => {
                self.storage.append_all(records)?;
                self.registry.insert(self.id, self.self_handle.clone());
                self.state = NodeState::Ready;
                for &peer in self.registry.keys() {
                    if peer != self.id {
                        self.transport
                            .send(peer, &self.registry, WireMsg::Join { sender: self.id })?;
                    }
                }
                info!(node = %self.id, "join complete, now ready");
            }
            (NodeState::RecoveringWaitingNodes, WireMsg::NodesList { nodes, .. }) => {
                self.registry.extend(nodes);
                self.purge_old_keys()?;
                self.registry.insert(self.id, self.self_handle.clone());
                self.state = NodeState::Ready;
                for &peer in self.registry.keys() {
                    if peer != self.id {
                        self.transport
                            .send(peer, &self.registry, WireMsg::ReJoin { sender: self.id })?;
                    }
                }
                info!(node = %self.id, "recovery complete, now ready");
            }
            (NodeState::Ready, WireMsg::Join { sender }) => {
                self.registry.insert(sender, PeerHandle::Channel);
                self.purge_old_keys()?;
            }
            (NodeState::Ready, WireMsg::ReJoin { sender }) => {
                self.registry.insert(sender, PeerHandle::Channel);
            }
            (NodeState::Ready, WireMsg::Leave { sender }) => {
                self.registry.remove(&sender);
            }
            (NodeState::Ready, WireMsg::JoinRequest { sender }) => {
                self.transport.send(
                    sender,
                    &self.registry,
                    WireMsg::NodesList {
                        sender: self.id,
                        nodes: self.registry.clone(),
                    },
                )?;
            }
            (NodeState::Ready, WireMsg::DataRequest { sender }) => {
                let records = self.storage.cache().iter().map(|(k, v)| (*k, v.clone())).collect();
                self.transport.send(
                    sender,
                    &self.registry,
                    WireMsg::JoinData { sender: self.id, records },
                )?;
            }
            (NodeState::Ready, WireMsg::LeaveData { records, .. }) => {
                self.storage.append_all(records)?;
            }
            (state, msg) => {
                warn!(node = %self.id, ?state, ?msg, "dropping message not meaningful in this state");
            }
        }
        Ok(())
    }

    /// Pushes local state to the nodes about to become responsible, tells
    /// the rest of the ring, and shuts the node down. Corresponds to
    /// `Ready + ClientLeaveRequest` in §4.D.
    pub fn leave(&mut self) -> Result<()> {
        let ids = self.node_ids();
        for target in ring::next_replicas_after(&ids, self.id, self.n) {
            let records = self.storage.cache().iter().map(|(k, v)| (*k, v.clone())).collect();
            self.transport.send(
                target,
                &self.registry,
                WireMsg::LeaveData { sender: self.id, records },
            )?;
        }
        for &peer in self.registry.keys() {
            if peer != self.id {
                self.transport
                    .send(peer, &self.registry, WireMsg::Leave { sender: self.id })?;
            }
        }
        info!(node = %self.id, "left the ring");
        Ok(())
    }

    pub fn node_ids(&self) -> BTreeSet<NodeID> {
        self.registry.keys().copied().collect()
    }

    /// Rewrites storage to keep only keys this node still owns under the
    /// current registry. Idempotent; safe to call after any topology
    /// change observed in `Ready`, and once after recovery.
    pub fn purge_old_keys(&mut self) -> Result<()> {
        let ids = self.node_ids();
        let retained = self
            .storage
            .cache()
            .iter()
            .filter(|(key, _)| ring::owners_of(&ids, **key, self.n).contains(&self.id))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        self.storage.write_all(retained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::NodeActor;
    use submerge_admin::Config;
    use submerge_net::transport::ChannelTransport;
    use submerge_vers::VersionedItem;
    use test_log::test;

    fn config(id: i64) -> Config {
        Config {
            node_id: id,
            storage_path: std::env::temp_dir().join(format!("submerge-membership-test-{id}-{}", std::process::id())),
            r: 2,
            w: 2,
            n: 3,
            peer_bind: "127.0.0.1:0".parse().unwrap(),
            client_bind: "127.0.0.1:0".parse().unwrap(),
            quorum_timeout: std::time::Duration::from_millis(200),
        }
    }

    #[test]
    fn bootstrap_is_ready_with_only_self() {
        let cfg = config(1);
        std::fs::create_dir_all(&cfg.storage_path).unwrap();
        let transport = std::sync::Arc::new(ChannelTransport::default());
        let (mut actor, _tx) = NodeActor::new(cfg, transport, PeerHandle::Channel).unwrap();
        actor.start(StartupCommand::Bootstrap).unwrap();
        assert_eq!(actor.state, NodeState::Ready);
        assert_eq!(actor.registry.len(), 1);
    }

    #[test]
    fn purge_drops_keys_no_longer_owned() {
        let cfg = config(10);
        std::fs::create_dir_all(&cfg.storage_path).unwrap();
        let transport = std::sync::Arc::new(ChannelTransport::default());
        let (mut actor, _tx) = NodeActor::new(cfg, transport, PeerHandle::Channel).unwrap();
        actor.start(StartupCommand::Bootstrap).unwrap();
        actor.registry.insert(NodeID(20), PeerHandle::Channel);
        actor.registry.insert(NodeID(30), PeerHandle::Channel);
        actor.storage.append(5, VersionedItem::new("v", 1)).unwrap();
        actor.n = 1;
        actor.purge_old_keys().unwrap();
        let ids = actor.node_ids();
        let owned = ring::owners_of(&ids, 5, 1).contains(&actor.id);
        assert_eq!(actor.storage.cache().contains_key(&5), owned);
    }
}
