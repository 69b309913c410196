//! Per-coordinator request tables (§4.C): in-flight reads and writes keyed
//! by a monotone local request id, each collecting votes toward its own
//! quorum threshold R.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use submerge_net::client::ClientResponse;
use submerge_vers::{Vote, VersionedItem};

pub struct ReadRequestStatus {
    pub key: i64,
    pub reply: Sender<ClientResponse>,
    pub r: usize,
    pub votes: Vec<Vote>,
}

impl ReadRequestStatus {
    pub fn quorum_reached(&self) -> bool {
        self.votes.len() >= self.r
    }
}

pub struct WriteRequestStatus {
    pub key: i64,
    pub value: String,
    pub reply: Sender<ClientResponse>,
    pub r: usize,
    #[allow(dead_code)] // stored per §3 but the completion check only ever consults R; see README note below.
    pub w: usize,
    pub votes: Vec<Vote>,
}

impl WriteRequestStatus {
    pub fn quorum_reached(&self) -> bool {
        self.votes.len() >= self.r
    }
}

/// Which table a request id belongs to, surfaced so the dispatcher can log
/// the right thing on timeout without the caller having to guess.
pub enum TableKind {
    Read,
    Write,
}

#[derive(Default)]
pub struct RequestTables {
    next_request_id: i64,
    reads: HashMap<i64, ReadRequestStatus>,
    writes: HashMap<i64, WriteRequestStatus>,
}

impl RequestTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> i64 {
        self.next_request_id += 1;
        self.next_request_id
    }

    /// The most recently assigned request id, coordinator-wide. Note this is
    /// *not* necessarily the id of whichever request is currently completing
    /// a quorum: other client requests arriving while this one's read phase
    /// was still collecting votes will have advanced it further. Exposed so
    /// the follow-up `WriteRequest` can reproduce that quirk rather than
    /// silently fix it (see the coordinator's write-phase dispatch).
    pub fn current_request_count(&self) -> i64 {
        self.next_request_id
    }

    pub fn begin_read(&mut self, key: i64, reply: Sender<ClientResponse>, r: usize) -> i64 {
        let id = self.next_id();
        self.reads.insert(
            id,
            ReadRequestStatus {
                key,
                reply,
                r,
                votes: Vec::new(),
            },
        );
        id
    }

    pub fn begin_write(
        &mut self,
        key: i64,
        value: String,
        reply: Sender<ClientResponse>,
        r: usize,
        w: usize,
    ) -> i64 {
        let id = self.next_id();
        self.writes.insert(
            id,
            WriteRequestStatus {
                key,
                value,
                reply,
                r,
                w,
                votes: Vec::new(),
            },
        );
        id
    }

    /// Records a vote for `req_id` in whichever table holds it. Returns the
    /// completed entry if this vote reached quorum (removing it from the
    /// table); an unknown `req_id` (stale, already completed, or never
    /// ours) is silently ignored, matching "drop" in §4.E.
    pub fn record_read_vote(&mut self, req_id: i64, from: i64, item: Option<VersionedItem>) -> Option<ReadRequestStatus> {
        let status = self.reads.get_mut(&req_id)?;
        status.votes.push(Vote { from, item });
        if status.quorum_reached() {
            self.reads.remove(&req_id)
        } else {
            None
        }
    }

    pub fn record_write_vote(&mut self, req_id: i64, from: i64, item: Option<VersionedItem>) -> Option<WriteRequestStatus> {
        let status = self.writes.get_mut(&req_id)?;
        status.votes.push(Vote { from, item });
        if status.quorum_reached() {
            self.writes.remove(&req_id)
        } else {
            None
        }
    }

    /// Records a vote for `req_id` in whichever table actually holds it,
    /// without the caller needing to know ahead of time whether it's a
    /// plain read or the read-phase of an update.
    pub fn record_vote(&mut self, req_id: i64, from: i64, item: Option<VersionedItem>) -> VoteOutcome {
        match self.contains(req_id) {
            Some(TableKind::Read) => match self.record_read_vote(req_id, from, item) {
                Some(status) => VoteOutcome::ReadComplete(status),
                None => VoteOutcome::Pending,
            },
            Some(TableKind::Write) => match self.record_write_vote(req_id, from, item) {
                Some(status) => VoteOutcome::WriteComplete(status),
                None => VoteOutcome::Pending,
            },
            None => VoteOutcome::NotFound,
        }
    }

    pub fn contains(&self, req_id: i64) -> Option<TableKind> {
        if self.reads.contains_key(&req_id) {
            Some(TableKind::Read)
        } else if self.writes.contains_key(&req_id) {
            Some(TableKind::Write)
        } else {
            None
        }
    }

    /// Removes and returns whichever entry `req_id` names, for timeout
    /// handling. A request id is never simultaneously present in both
    /// tables (§3 invariant 4), so at most one of these is `Some`.
    pub fn take_on_timeout(&mut self, req_id: i64) -> Option<TimedOut> {
        if let Some(status) = self.reads.remove(&req_id) {
            Some(TimedOut::Read(status))
        } else {
            self.writes.remove(&req_id).map(TimedOut::Write)
        }
    }
}

pub enum TimedOut {
    Read(ReadRequestStatus),
    Write(WriteRequestStatus),
}

pub enum VoteOutcome {
    NotFound,
    Pending,
    ReadComplete(ReadRequestStatus),
    WriteComplete(WriteRequestStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use test_log::test;

    #[test]
    fn read_quorum_completes_at_r_votes() {
        let mut tables = RequestTables::new();
        let (tx, _rx) = mpsc::channel();
        let id = tables.begin_read(1, tx, 2);
        assert!(tables.record_read_vote(id, 10, None).is_none());
        let done = tables.record_read_vote(id, 20, Some(VersionedItem::new("x", 1)));
        assert!(done.is_some());
        assert!(tables.contains(id).is_none());
    }

    #[test]
    fn stale_vote_after_quorum_is_ignored() {
        let mut tables = RequestTables::new();
        let (tx, _rx) = mpsc::channel();
        let id = tables.begin_read(1, tx, 1);
        assert!(tables.record_read_vote(id, 10, None).is_some());
        // request id is gone now; a late vote must not panic or resurrect it
        assert!(tables.record_read_vote(id, 20, None).is_none());
    }

    #[test]
    fn timeout_takes_whichever_table_holds_the_id() {
        let mut tables = RequestTables::new();
        let (tx, _rx) = mpsc::channel();
        let read_id = tables.begin_read(1, tx.clone(), 2);
        let write_id = tables.begin_write(2, "v".into(), tx, 2, 2);
        assert!(matches!(tables.take_on_timeout(read_id), Some(TimedOut::Read(_))));
        assert!(matches!(tables.take_on_timeout(write_id), Some(TimedOut::Write(_))));
        assert!(tables.take_on_timeout(read_id).is_none());
    }

    #[test]
    fn request_ids_are_monotone_and_disjoint_across_tables() {
        let mut tables = RequestTables::new();
        let (tx, _rx) = mpsc::channel();
        let a = tables.begin_read(1, tx.clone(), 1);
        let b = tables.begin_write(1, "v".into(), tx, 1, 1);
        assert!(b > a);
    }
}
