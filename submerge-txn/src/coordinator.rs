//! The coordinator side of quorum reads and updates (§4.E). Replica-side
//! handling of `ReadRequest`/`WriteRequest` touches `StorageGateway`
//! directly and lives in the dispatcher, not here; this module only
//! orchestrates requests that *this* node originated.

use crate::tables::{RequestTables, TimedOut, VoteOutcome};
use std::collections::BTreeSet;
use std::sync::mpsc::Sender;
use submerge_net::client::ClientResponse;
use submerge_net::{ring, NodeID, NodeRegistry, Transport};
use submerge_net::message::WireMsg;
use submerge_vers::{latest, next_version, VersionedItem};

pub struct Coordinator {
    pub tables: RequestTables,
    n: usize,
    r: usize,
    w: usize,
}

impl Coordinator {
    pub fn new(n: usize, r: usize, w: usize) -> Self {
        Self {
            tables: RequestTables::new(),
            n,
            r,
            w,
        }
    }

    fn node_ids(registry: &NodeRegistry) -> BTreeSet<NodeID> {
        registry.keys().copied().collect()
    }

    /// Starts a client-initiated read. Returns the new request id for the
    /// dispatcher to arm a quorum timer against, or `None` if the request
    /// was refused (and already replied to) for lack of nodes.
    pub fn begin_client_read(
        &mut self,
        self_id: NodeID,
        registry: &NodeRegistry,
        transport: &dyn Transport,
        key: i64,
        reply: Sender<ClientResponse>,
    ) -> submerge_base::Result<Option<i64>> {
        if registry.len() < self.r || registry.len() < self.n {
            let _ = reply.send(ClientResponse::Error {
                node: self_id,
                message: "not enough nodes".into(),
            });
            return Ok(None);
        }
        let req_id = self.tables.begin_read(key, reply, self.r);
        for owner in ring::owners_of(&Self::node_ids(registry), key, self.n) {
            transport.send(
                owner,
                registry,
                WireMsg::ReadRequest {
                    coord: self_id,
                    req_id,
                    key,
                },
            )?;
        }
        Ok(Some(req_id))
    }

    /// Starts a client-initiated update. The read-quorum admission check
    /// deliberately only guards on N, not R (§4.E, §9).
    pub fn begin_client_update(
        &mut self,
        self_id: NodeID,
        registry: &NodeRegistry,
        transport: &dyn Transport,
        key: i64,
        value: String,
        reply: Sender<ClientResponse>,
    ) -> submerge_base::Result<Option<i64>> {
        if registry.len() < self.n {
            let _ = reply.send(ClientResponse::Error {
                node: self_id,
                message: "not enough nodes".into(),
            });
            return Ok(None);
        }
        let req_id = self.tables.begin_write(key, value, reply, self.r, self.w);
        for owner in ring::owners_of(&Self::node_ids(registry), key, self.n) {
            transport.send(
                owner,
                registry,
                WireMsg::ReadRequest {
                    coord: self_id,
                    req_id,
                    key,
                },
            )?;
        }
        Ok(Some(req_id))
    }

    /// A `ReadResponse` arrived for a request this node coordinates. Drops
    /// silently if `req_id` names neither table (stale, already complete,
    /// or a response to someone else's request that reached this node by
    /// mistake never happens but is handled the same way regardless).
    pub fn handle_read_response(
        &mut self,
        self_id: NodeID,
        registry: &NodeRegistry,
        transport: &dyn Transport,
        replica: NodeID,
        req_id: i64,
        item: Option<VersionedItem>,
    ) -> submerge_base::Result<()> {
        match self.tables.record_vote(req_id, replica.0, item) {
            VoteOutcome::NotFound | VoteOutcome::Pending => Ok(()),
            VoteOutcome::ReadComplete(status) => {
                let value = latest(&status.votes).map(|v| v.value);
                let _ = status.reply.send(ClientResponse::ReadOk {
                    node: self_id,
                    key: status.key,
                    value,
                });
                Ok(())
            }
            VoteOutcome::WriteComplete(status) => {
                let version = next_version(&status.votes);
                let item = VersionedItem::new(status.value.clone(), version);
                let _ = status.reply.send(ClientResponse::UpdateOk {
                    node: self_id,
                    key: status.key,
                    value: status.value,
                    version,
                });
                // Deliberately *not* `req_id`: the write phase stamps the
                // coordinator's current request counter, which may have
                // moved on past this request's own id if other client
                // requests arrived while this one's read quorum was still
                // collecting votes. A later `TimeoutMessage` or vote for
                // that newer id can then collide with this write's tag.
                // Preserved as-is (see tables::current_request_count).
                let write_tag = self.tables.current_request_count();
                for owner in ring::owners_of(&Self::node_ids(registry), status.key, self.n) {
                    transport.send(
                        owner,
                        registry,
                        WireMsg::WriteRequest {
                            coord: self_id,
                            req_id: write_tag,
                            key: status.key,
                            item: item.clone(),
                        },
                    )?;
                }
                Ok(())
            }
        }
    }

    /// A quorum timer fired. If the request is still live, surfaces a
    /// timeout error to the waiting client and removes the entry; a
    /// request that already completed is a silent no-op.
    pub fn handle_timeout(&mut self, self_id: NodeID, req_id: i64) {
        match self.tables.take_on_timeout(req_id) {
            Some(TimedOut::Read(status)) => {
                let _ = status.reply.send(ClientResponse::Error {
                    node: self_id,
                    message: "timeout".into(),
                });
            }
            Some(TimedOut::Write(status)) => {
                let _ = status.reply.send(ClientResponse::Error {
                    node: self_id,
                    message: "timeout".into(),
                });
            }
            None => {}
        }
    }
}
