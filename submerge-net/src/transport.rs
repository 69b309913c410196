//! Point-to-point message delivery between named peers. The core only
//! assumes an unreliable ordered delivery primitive (§5); these are two
//! concrete implementations of it, both object-safe behind `Transport` so
//! the node dispatcher never has to know which one it's running on.

use crate::message::{Envelope, WireMsg};
use crate::{NodeID, NodeRegistry, PeerHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use submerge_base::{err, Result};
use tracing::{debug, warn};

/// Writes a single length-prefixed `rmp-serde` frame: a 4-byte big-endian
/// length followed by the encoded payload.
pub fn write_frame<W: Write, T: Serialize>(w: &mut W, val: &T) -> Result<()> {
    let buf = rmp_serde::to_vec(val)?;
    let len = u32::try_from(buf.len()).map_err(|_| err("frame too large"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(&buf)?;
    Ok(())
}

/// Reads back one frame written by `write_frame`.
pub fn read_frame<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(rmp_serde::from_slice(&buf)?)
}

pub trait Transport: Send + Sync {
    fn send(&self, dst: NodeID, registry: &NodeRegistry, msg: WireMsg) -> Result<()>;
}

/// In-process transport backed by `std::sync::mpsc`. Every node registers
/// its mailbox sender under its own id; `send` looks the destination up in
/// that directory and hands the message straight to it, which is
/// trivially FIFO per directed edge.
#[derive(Default, Clone)]
pub struct ChannelTransport {
    directory: Arc<Mutex<HashMap<NodeID, Sender<Envelope>>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: NodeID, mailbox: Sender<Envelope>) {
        self.directory.lock().expect("directory lock poisoned").insert(id, mailbox);
    }
}

impl Transport for ChannelTransport {
    fn send(&self, dst: NodeID, _registry: &NodeRegistry, msg: WireMsg) -> Result<()> {
        let directory = self.directory.lock().expect("directory lock poisoned");
        let mailbox = directory
            .get(&dst)
            .ok_or_else(|| err(format!("no channel registered for node {dst}")))?;
        mailbox
            .send(Envelope::Peer(msg))
            .map_err(|_| err(format!("mailbox for node {dst} is closed")))
    }
}

/// TCP transport. One persistent outbound connection per destination,
/// opened lazily and reused, which is what gives us ordering on a directed
/// edge without any sequence numbering. A broken connection is dropped and
/// retried exactly once on the next send.
#[derive(Default)]
pub struct TcpTransport {
    conns: Mutex<HashMap<NodeID, TcpStream>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn addr_of(dst: NodeID, registry: &NodeRegistry) -> Result<SocketAddr> {
        match registry.get(&dst) {
            Some(PeerHandle::Tcp(addr)) => Ok(*addr),
            Some(PeerHandle::Channel) => {
                Err(err(format!("node {dst} is registered on the channel transport, not TCP")))
            }
            None => Err(err(format!("no address registered for node {dst}"))),
        }
    }

    fn send_once(&self, dst: NodeID, addr: SocketAddr, msg: &WireMsg) -> Result<()> {
        let mut conns = self.conns.lock().expect("conns lock poisoned");
        if !conns.contains_key(&dst) {
            let stream = TcpStream::connect(addr)?;
            conns.insert(dst, stream);
        }
        let stream = conns.get_mut(&dst).expect("just inserted");
        write_frame(stream, msg)
    }
}

impl Transport for TcpTransport {
    fn send(&self, dst: NodeID, registry: &NodeRegistry, msg: WireMsg) -> Result<()> {
        let addr = Self::addr_of(dst, registry)?;
        if self.send_once(dst, addr, &msg).is_err() {
            // Stale or broken connection: drop it and retry once.
            self.conns.lock().expect("conns lock poisoned").remove(&dst);
            self.send_once(dst, addr, &msg)?;
        }
        Ok(())
    }
}

/// Accepts inbound peer connections on `bind_addr` and, for each one, spawns
/// a reader thread that decodes frames and forwards them to `mailbox` as
/// `Envelope::Peer` until the connection closes.
pub fn spawn_peer_listener(bind_addr: SocketAddr, mailbox: Sender<Envelope>) -> Result<SocketAddr> {
    let listener = TcpListener::bind(bind_addr)?;
    let local_addr = listener.local_addr()?;
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let mailbox = mailbox.clone();
            thread::spawn(move || peer_connection_loop(stream, mailbox));
        }
    });
    Ok(local_addr)
}

fn peer_connection_loop(mut stream: TcpStream, mailbox: Sender<Envelope>) {
    loop {
        match read_frame::<_, WireMsg>(&mut stream) {
            Ok(msg) => {
                debug!(?msg, "received peer frame");
                if mailbox.send(Envelope::Peer(msg)).is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

/// Accepts inbound client connections on `bind_addr`. Each connection reads
/// exactly one `ClientRequest`, forwards it with a reply channel as
/// `Envelope::Client`, waits for the node to answer, and writes back one
/// `ClientResponse` before closing.
pub fn spawn_client_listener(bind_addr: SocketAddr, mailbox: Sender<Envelope>) -> Result<SocketAddr> {
    let listener = TcpListener::bind(bind_addr)?;
    let local_addr = listener.local_addr()?;
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let mailbox = mailbox.clone();
            thread::spawn(move || client_connection(stream, mailbox));
        }
    });
    Ok(local_addr)
}

fn client_connection(mut stream: TcpStream, mailbox: Sender<Envelope>) {
    let req = match read_frame(&mut stream) {
        Ok(req) => req,
        Err(_) => return,
    };
    let (reply_tx, reply_rx) = std::sync::mpsc::channel();
    if mailbox.send(Envelope::Client(req, reply_tx)).is_err() {
        warn!("node mailbox closed while handling client connection");
        return;
    }
    let Ok(resp) = reply_rx.recv() else { return };
    let _ = write_frame(&mut stream, &resp);
}
