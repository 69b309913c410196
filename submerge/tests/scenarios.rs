//! End-to-end scenarios (spec §8), each driving 1-4 in-process `NodeActor`s
//! over the channel transport purely through the client protocol, the same
//! way a real client would. No peeking at private node state: correctness
//! is judged by what a client could actually observe.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use submerge::{NodeActor, StartupCommand};
use submerge_admin::Config;
use submerge_net::client::{call, ClientRequest, ClientResponse};
use submerge_net::message::Envelope;
use submerge_net::transport::ChannelTransport;
use submerge_net::{NodeID, PeerHandle};

fn dummy_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn scratch_dir(test: &str, id: i64) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("submerge-scenario-{test}-{id}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&p);
    p
}

fn config(id: i64, dir: &Path, r: usize, w: usize, n: usize, timeout_ms: u64) -> Config {
    Config {
        node_id: id,
        storage_path: dir.to_path_buf(),
        r,
        w,
        n,
        peer_bind: dummy_addr(),
        client_bind: dummy_addr(),
        quorum_timeout: Duration::from_millis(timeout_ms),
    }
}

/// Boots a node and leaves it running on its own thread, returning a handle
/// to its mailbox that a test can issue client requests against.
fn spawn_bootstrap(transport: &ChannelTransport, cfg: Config) -> Sender<Envelope> {
    std::fs::create_dir_all(&cfg.storage_path).unwrap();
    let id = NodeID(cfg.node_id);
    let (mut actor, mailbox) = NodeActor::new(cfg, Arc::new(transport.clone()), PeerHandle::Channel).unwrap();
    transport.register(id, mailbox.clone());
    actor.start(StartupCommand::Bootstrap).unwrap();
    thread::spawn(move || {
        let _ = actor.run();
    });
    mailbox
}

fn spawn_join(transport: &ChannelTransport, cfg: Config, contact: i64) -> Sender<Envelope> {
    std::fs::create_dir_all(&cfg.storage_path).unwrap();
    let id = NodeID(cfg.node_id);
    let (mut actor, mailbox) = NodeActor::new(cfg, Arc::new(transport.clone()), PeerHandle::Channel).unwrap();
    transport.register(id, mailbox.clone());
    actor
        .start(StartupCommand::Join {
            contact_id: NodeID(contact),
            contact_addr: dummy_addr(),
        })
        .unwrap();
    thread::spawn(move || {
        let _ = actor.run();
    });
    mailbox
}

fn spawn_recover(transport: &ChannelTransport, cfg: Config, contact: i64) -> Sender<Envelope> {
    let id = NodeID(cfg.node_id);
    let (mut actor, mailbox) = NodeActor::new(cfg, Arc::new(transport.clone()), PeerHandle::Channel).unwrap();
    transport.register(id, mailbox.clone());
    actor
        .start(StartupCommand::Recover {
            contact_id: NodeID(contact),
            contact_addr: dummy_addr(),
        })
        .unwrap();
    thread::spawn(move || {
        let _ = actor.run();
    });
    mailbox
}

/// Severs `id` from the shared transport directory by overwriting its
/// registration with a channel nobody drains: sends to it keep succeeding
/// (so fan-out from a coordinator never errors, matching §5's "no flow
/// control, missing replies absorbed silently"), but the bytes go nowhere.
/// The node's own thread is left spinning on its original, now-orphaned
/// mailbox, which is an acceptable stand-in for "unreachable" in a test.
fn partition(transport: &ChannelTransport, id: i64) {
    let (dead_tx, dead_rx) = std::sync::mpsc::channel();
    transport.register(NodeID(id), dead_tx);
    // Leak the receiver: it must outlive the test or the channel would
    // disconnect and sends would start failing, which is not what a
    // partition looks like at this layer.
    std::mem::forget(dead_rx);
}

fn update(mailbox: &Sender<Envelope>, key: i64, value: &str) -> ClientResponse {
    call(
        mailbox,
        ClientRequest::Update {
            key,
            value: value.into(),
        },
    )
    .unwrap()
}

fn read(mailbox: &Sender<Envelope>, key: i64) -> ClientResponse {
    call(mailbox, ClientRequest::Read { key }).unwrap()
}

fn settle() {
    thread::sleep(Duration::from_millis(200));
}

#[test]
fn bootstrap_single_update_and_read() {
    let transport = ChannelTransport::default();
    let dir = scratch_dir("bootstrap", 10);
    let node10 = spawn_bootstrap(&transport, config(10, &dir, 1, 1, 1, 500));
    settle();

    match update(&node10, 42, "alpha") {
        ClientResponse::UpdateOk { node, key, value, version } => {
            assert_eq!(node, NodeID(10));
            assert_eq!(key, 42);
            assert_eq!(value, "alpha");
            assert_eq!(version, 1);
        }
        other => panic!("unexpected response {other:?}"),
    }

    match read(&node10, 42) {
        ClientResponse::ReadOk { node, key, value } => {
            assert_eq!(node, NodeID(10));
            assert_eq!(key, 42);
            assert_eq!(value.as_deref(), Some("alpha"));
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[test]
fn three_node_join_serves_reads_from_every_coordinator() {
    let transport = ChannelTransport::default();
    let dir = scratch_dir("join", 0);
    let node10 = spawn_bootstrap(&transport, config(10, &dir.join("10"), 2, 2, 3, 500));
    settle();
    let node20 = spawn_join(&transport, config(20, &dir.join("20"), 2, 2, 3, 500), 10);
    settle();
    let node30 = spawn_join(&transport, config(30, &dir.join("30"), 2, 2, 3, 500), 10);
    settle();

    match update(&node10, 7, "v1") {
        ClientResponse::UpdateOk { version, .. } => assert_eq!(version, 1),
        other => panic!("unexpected response {other:?}"),
    }
    settle();

    // With |S| = N = 3, every node is an owner of every key, so reading
    // through any of the three as coordinator must see the same value.
    for coord in [&node10, &node20, &node30] {
        match read(coord, 7) {
            ClientResponse::ReadOk { value, .. } => assert_eq!(value.as_deref(), Some("v1")),
            other => panic!("unexpected response {other:?}"),
        }
    }
}

#[test]
fn quorum_read_tolerates_one_silent_replica() {
    let transport = ChannelTransport::default();
    let dir = scratch_dir("partition", 0);
    let node10 = spawn_bootstrap(&transport, config(10, &dir.join("10"), 2, 2, 3, 400));
    settle();
    let _node20 = spawn_join(&transport, config(20, &dir.join("20"), 2, 2, 3, 400), 10);
    settle();
    let _node30 = spawn_join(&transport, config(30, &dir.join("30"), 2, 2, 3, 400), 10);
    settle();

    match update(&node10, 5, "x") {
        ClientResponse::UpdateOk { version, .. } => assert_eq!(version, 1),
        other => panic!("unexpected response {other:?}"),
    }
    settle();

    partition(&transport, 30);

    match read(&node10, 5) {
        ClientResponse::ReadOk { value, .. } => assert_eq!(value.as_deref(), Some("x")),
        other => panic!("unexpected response {other:?}"),
    }
}

#[test]
fn quorum_read_times_out_when_r_exceeds_reachable_replicas() {
    let transport = ChannelTransport::default();
    let dir = scratch_dir("partition-r3", 0);
    // r = 3 = n, so every owner must answer; once one is partitioned the
    // read can never reach quorum and must surface a timeout.
    let node10 = spawn_bootstrap(&transport, config(10, &dir.join("10"), 3, 1, 3, 300));
    settle();
    let _node20 = spawn_join(&transport, config(20, &dir.join("20"), 3, 1, 3, 300), 10);
    settle();
    let _node30 = spawn_join(&transport, config(30, &dir.join("30"), 3, 1, 3, 300), 10);
    settle();

    match update(&node10, 5, "x") {
        ClientResponse::UpdateOk { .. } => {}
        other => panic!("unexpected response {other:?}"),
    }
    settle();

    partition(&transport, 30);

    match read(&node10, 5) {
        ClientResponse::Error { message, .. } => assert_eq!(message, "timeout"),
        other => panic!("expected a timeout error, got {other:?}"),
    }
}

#[test]
fn version_is_monotone_across_repeated_updates() {
    let transport = ChannelTransport::default();
    let dir = scratch_dir("monotone", 0);
    let node10 = spawn_bootstrap(&transport, config(10, &dir.join("10"), 2, 2, 3, 500));
    settle();
    let node20 = spawn_join(&transport, config(20, &dir.join("20"), 2, 2, 3, 500), 10);
    settle();
    let _node30 = spawn_join(&transport, config(30, &dir.join("30"), 2, 2, 3, 500), 10);
    settle();

    for (value, expected_version) in [("a", 1), ("b", 2), ("c", 3)] {
        match update(&node10, 7, value) {
            ClientResponse::UpdateOk { version, .. } => assert_eq!(version, expected_version),
            other => panic!("unexpected response {other:?}"),
        }
        settle();
    }

    match read(&node20, 7) {
        ClientResponse::ReadOk { value, .. } => assert_eq!(value.as_deref(), Some("c")),
        other => panic!("unexpected response {other:?}"),
    }
}

#[test]
fn graceful_leave_hands_off_and_survivors_keep_serving() {
    let transport = ChannelTransport::default();
    let dir = scratch_dir("leave", 0);
    let node10 = spawn_bootstrap(&transport, config(10, &dir.join("10"), 2, 2, 3, 500));
    settle();
    let node20 = spawn_join(&transport, config(20, &dir.join("20"), 2, 2, 3, 500), 10);
    settle();
    let node30 = spawn_join(&transport, config(30, &dir.join("30"), 2, 2, 3, 500), 10);
    settle();
    let node40 = spawn_join(&transport, config(40, &dir.join("40"), 2, 2, 3, 500), 10);
    settle();

    match update(&node10, 100, "payload") {
        ClientResponse::UpdateOk { .. } => {}
        other => panic!("unexpected response {other:?}"),
    }
    settle();

    match call(&node20, ClientRequest::Leave).unwrap() {
        ClientResponse::LeaveOk { node } => assert_eq!(node, NodeID(20)),
        other => panic!("unexpected response {other:?}"),
    }
    settle();

    for coord in [&node10, &node30, &node40] {
        match read(coord, 100) {
            ClientResponse::ReadOk { value, .. } => assert_eq!(value.as_deref(), Some("payload")),
            other => panic!("unexpected response {other:?}"),
        }
    }
}

#[test]
fn recovery_after_crash_sees_either_current_or_stale_value() {
    let transport = ChannelTransport::default();
    let dir = scratch_dir("recover", 0);
    let node10 = spawn_bootstrap(&transport, config(10, &dir.join("10"), 2, 2, 3, 400));
    settle();
    let node20 = spawn_join(&transport, config(20, &dir.join("20"), 2, 2, 3, 400), 10);
    settle();
    let node30_dir = dir.join("30");
    let _node30 = spawn_join(&transport, config(30, &node30_dir, 2, 2, 3, 400), 10);
    settle();

    update(&node10, 55, "a");
    settle();
    update(&node10, 55, "b");
    settle();

    // node 30 "crashes": its registration is replaced so it receives
    // nothing further, but its on-disk file (at `node30_dir`) survives.
    partition(&transport, 30);

    match update(&node10, 55, "new") {
        ClientResponse::UpdateOk { version, .. } => assert_eq!(version, 3),
        other => panic!("unexpected response {other:?}"),
    }
    settle();

    let node30 = spawn_recover(&transport, config(30, &node30_dir, 2, 2, 3, 400), 10);
    settle();

    // §8 scenario 6: which two of the three owners answer first is a race;
    // the only guarantee is that the surfaced value is one this node
    // actually has on record, not a third, made-up one.
    match read(&node20, 55) {
        ClientResponse::ReadOk { value, .. } => {
            assert!(matches!(value.as_deref(), Some("new") | Some("b")));
        }
        other => panic!("unexpected response {other:?}"),
    }

    // the recovered node itself must have rejoined and be answering again
    match read(&node30, 55) {
        ClientResponse::ReadOk { .. } => {}
        other => panic!("recovered node should be serving again, got {other:?}"),
    }
}
