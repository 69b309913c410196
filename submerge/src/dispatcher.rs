//! The single-threaded node loop (§4.F): one `Envelope` processed to
//! completion per `step`, dispatched to the membership state machine, the
//! quorum coordinator, or the replica-side storage handlers.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use submerge_admin::Config;
use submerge_base::Result;
use submerge_net::client::{ClientRequest, ClientResponse};
use submerge_net::message::{Envelope, WireMsg};
use submerge_net::{NodeID, NodeRegistry, PeerHandle, Transport};
use submerge_store::StorageGateway;
use submerge_txn::Coordinator;
use tracing::{debug, info, warn};

use crate::membership::NodeState;

pub struct NodeActor {
    pub(crate) id: NodeID,
    pub(crate) state: NodeState,
    pub(crate) registry: NodeRegistry,
    pub(crate) storage: StorageGateway,
    pub(crate) coordinator: Coordinator,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) n: usize,
    /// How this node is reachable on its own transport, i.e. the
    /// `PeerHandle` it registers for itself at every start transition.
    /// `Bootstrap`/`Join`/`Recover` all need this, and it has to match
    /// whichever `Transport` the caller wired up (§4.G): a node on
    /// `ChannelTransport` registers `PeerHandle::Channel`, a node on
    /// `TcpTransport` registers `PeerHandle::Tcp(peer_bind)`.
    pub(crate) self_handle: PeerHandle,
    quorum_timeout: Duration,
    mailbox_tx: Sender<Envelope>,
    mailbox_rx: Receiver<Envelope>,
}

impl NodeActor {
    /// Builds a node against `config`, opening (or creating) its record
    /// file. `self_handle` must match the transport the caller is about to
    /// run this node on (`PeerHandle::Channel` for `ChannelTransport`,
    /// `PeerHandle::Tcp(config.peer_bind)` for `TcpTransport`), since every
    /// start transition registers it as this node's own entry. The node
    /// starts in an arbitrary pre-`start` state; callers must call `start`
    /// with a `StartupCommand` before pumping the mailbox. Returns the
    /// actor along with a clone of its mailbox sender so the caller can
    /// wire up listeners or a channel-transport registration before the
    /// node is running.
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        self_handle: PeerHandle,
    ) -> Result<(Self, Sender<Envelope>)> {
        std::fs::create_dir_all(&config.storage_path)?;
        let storage = StorageGateway::open(config.record_file())?;
        let (mailbox_tx, mailbox_rx) = mpsc::channel();
        let actor = Self {
            id: NodeID(config.node_id),
            state: NodeState::JoiningWaitingNodes,
            registry: NodeRegistry::new(),
            storage,
            coordinator: Coordinator::new(config.n, config.r, config.w),
            transport,
            n: config.n,
            self_handle,
            quorum_timeout: config.quorum_timeout,
            mailbox_tx: mailbox_tx.clone(),
            mailbox_rx,
        };
        Ok((actor, mailbox_tx))
    }

    pub fn id(&self) -> NodeID {
        self.id
    }

    pub fn mailbox(&self) -> Sender<Envelope> {
        self.mailbox_tx.clone()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Keys this node currently holds in local storage. Exposed for
    /// introspection (tests, admin tooling) rather than anything the
    /// dispatch loop itself needs.
    pub fn local_keys(&self) -> Vec<i64> {
        self.storage.cache().keys().copied().collect()
    }

    /// Spawns a detached timer that delivers `TimeoutMessage { req_id }` to
    /// this node's own mailbox after `quorum_timeout`. There is no
    /// cancellation; a timer firing after its table entry is gone is a
    /// no-op at dispatch (§4.C, §5).
    fn arm_timeout(&self, req_id: i64) {
        let mailbox = self.mailbox_tx.clone();
        let delay = self.quorum_timeout;
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = mailbox.send(Envelope::Peer(WireMsg::TimeoutMessage { req_id }));
        });
    }

    /// Processes exactly one `Envelope`. Returns `false` when the node has
    /// just processed a client leave and should stop looping.
    pub fn step(&mut self) -> Result<bool> {
        let envelope = match self.mailbox_rx.recv() {
            Ok(e) => e,
            Err(_) => return Ok(false),
        };
        match envelope {
            Envelope::Peer(WireMsg::TimeoutMessage { req_id }) => {
                self.coordinator.handle_timeout(self.id, req_id);
                Ok(true)
            }
            Envelope::Peer(WireMsg::ReadRequest { coord, req_id, key }) => {
                if self.state != NodeState::Ready {
                    warn!(node = %self.id, "dropping ReadRequest, not ready");
                    return Ok(true);
                }
                let item = self.storage.cache().get(&key).cloned();
                self.transport.send(
                    coord,
                    &self.registry,
                    WireMsg::ReadResponse {
                        replica: self.id,
                        req_id,
                        key,
                        item,
                    },
                )?;
                Ok(true)
            }
            Envelope::Peer(WireMsg::WriteRequest { key, item, .. }) => {
                if self.state != NodeState::Ready {
                    warn!(node = %self.id, "dropping WriteRequest, not ready");
                    return Ok(true);
                }
                self.storage.append(key, item)?;
                Ok(true)
            }
            Envelope::Peer(WireMsg::ReadResponse { replica, req_id, item, .. }) => {
                self.coordinator
                    .handle_read_response(self.id, &self.registry, self.transport.as_ref(), replica, req_id, item)?;
                Ok(true)
            }
            Envelope::Peer(msg) => {
                self.handle_peer_message(msg)?;
                Ok(true)
            }
            Envelope::Client(ClientRequest::Read { key }, reply) => {
                if self.state != NodeState::Ready {
                    let _ = reply.send(ClientResponse::Error {
                        node: self.id,
                        message: "node is not ready".into(),
                    });
                    return Ok(true);
                }
                if let Some(req_id) = self
                    .coordinator
                    .begin_client_read(self.id, &self.registry, self.transport.as_ref(), key, reply)?
                {
                    self.arm_timeout(req_id);
                }
                Ok(true)
            }
            Envelope::Client(ClientRequest::Update { key, value }, reply) => {
                if self.state != NodeState::Ready {
                    let _ = reply.send(ClientResponse::Error {
                        node: self.id,
                        message: "node is not ready".into(),
                    });
                    return Ok(true);
                }
                if let Some(req_id) = self.coordinator.begin_client_update(
                    self.id,
                    &self.registry,
                    self.transport.as_ref(),
                    key,
                    value,
                    reply,
                )? {
                    self.arm_timeout(req_id);
                }
                Ok(true)
            }
            Envelope::Client(ClientRequest::Leave, reply) => {
                if self.state != NodeState::Ready {
                    let _ = reply.send(ClientResponse::Error {
                        node: self.id,
                        message: "node is not ready".into(),
                    });
                    return Ok(true);
                }
                self.leave()?;
                let _ = reply.send(ClientResponse::LeaveOk { node: self.id });
                Ok(false)
            }
        }
    }

    /// Pumps `step` until the node leaves or its mailbox closes.
    pub fn run(&mut self) -> Result<()> {
        debug!(node = %self.id, "node loop starting");
        while self.step()? {}
        info!(node = %self.id, "node loop stopped");
        Ok(())
    }
}
