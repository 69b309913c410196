//! The client-facing request/response vocabulary (§6) and a minimal
//! synchronous client for it. Carried over the same length-prefixed
//! `rmp-serde` framing as peer traffic (see `transport::{read_frame,
//! write_frame}`), one request per TCP connection.

use crate::message::Envelope;
use crate::transport::{read_frame, write_frame};
use crate::NodeID;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use submerge_base::{err, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ClientRequest {
    Read { key: i64 },
    Update { key: i64, value: String },
    Leave,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ClientResponse {
    ReadOk {
        node: NodeID,
        key: i64,
        value: Option<String>,
    },
    UpdateOk {
        node: NodeID,
        key: i64,
        value: String,
        version: u64,
    },
    LeaveOk {
        node: NodeID,
    },
    Error {
        node: NodeID,
        message: String,
    },
}

/// Submits `req` directly to an in-process node's mailbox and blocks for its
/// response. Used by tests and by the `demo` subcommand, which run nodes on
/// the channel transport without any real socket.
pub fn call(mailbox: &mpsc::Sender<Envelope>, req: ClientRequest) -> Result<ClientResponse> {
    let (reply_tx, reply_rx) = mpsc::channel();
    mailbox
        .send(Envelope::Client(req, reply_tx))
        .map_err(|_| err("node mailbox closed"))?;
    reply_rx.recv().map_err(|_| err("node dropped the request without replying"))
}

/// A connect-per-request client for talking to a node's client-bind TCP
/// address.
pub struct Client {
    addr: SocketAddr,
}

impl Client {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn send(&self, req: ClientRequest) -> Result<ClientResponse> {
        let mut stream = TcpStream::connect(self.addr)?;
        write_frame(&mut stream, &req)?;
        stream.flush()?;
        read_frame(&mut stream)
    }

    pub fn read(&self, key: i64) -> Result<ClientResponse> {
        self.send(ClientRequest::Read { key })
    }

    pub fn update(&self, key: i64, value: impl Into<String>) -> Result<ClientResponse> {
        self.send(ClientRequest::Update {
            key,
            value: value.into(),
        })
    }

    pub fn leave(&self) -> Result<ClientResponse> {
        self.send(ClientRequest::Leave)
    }
}
