//! The `submerge` CLI (§4.H): `serve` launches a node against a real TCP
//! transport; `client` is a thin wrapper around `submerge_net::client::Client`
//! for manual poking and integration tests.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use submerge::{NodeActor, StartupCommand};
use submerge_admin::Config;
use submerge_base::{err, Result};
use submerge_net::client::{call, Client, ClientRequest, ClientResponse};
use submerge_net::transport::{spawn_client_listener, spawn_peer_listener, ChannelTransport, TcpTransport};
use submerge_net::{NodeID, PeerHandle};

#[derive(Parser)]
#[command(name = "submerge", about = "A peer-to-peer consistent-hash key-value store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a node.
    Serve {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        r: usize,
        #[arg(long)]
        w: usize,
        #[arg(long)]
        n: usize,
        #[arg(long = "peer-bind")]
        peer_bind: SocketAddr,
        #[arg(long = "client-bind")]
        client_bind: SocketAddr,
        #[arg(long, default_value_t = 500)]
        quorum_timeout_ms: u64,
        /// Start a brand new ring with this node as its sole member.
        #[arg(long, conflicts_with_all = ["join", "recover"])]
        bootstrap: bool,
        /// Join an existing ring by contacting `id@host:port`.
        #[arg(long, value_parser = parse_contact, conflicts_with = "recover")]
        join: Option<(NodeID, SocketAddr)>,
        /// Rejoin after a crash by contacting `id@host:port`, keeping local storage.
        #[arg(long, value_parser = parse_contact)]
        recover: Option<(NodeID, SocketAddr)>,
    },
    /// Send one request to a running node's client port.
    Client {
        #[arg(long)]
        connect: SocketAddr,
        #[command(subcommand)]
        action: ClientAction,
    },
    /// Run a small in-process ring on the channel transport, issue one
    /// update and one read through it, and print what each node saw. For
    /// poking at the system without standing up real sockets.
    Demo {
        #[arg(long, default_value_t = 3)]
        nodes: usize,
        #[arg(long, default_value_t = 2)]
        r: usize,
        #[arg(long, default_value_t = 2)]
        w: usize,
        #[arg(long, default_value_t = 3)]
        n: usize,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    Read { key: i64 },
    Update { key: i64, value: String },
    Leave,
}

fn parse_contact(s: &str) -> std::result::Result<(NodeID, SocketAddr), String> {
    let (id, addr) = s.split_once('@').ok_or("expected `id@host:port`")?;
    let id: i64 = id.parse().map_err(|_| "contact id must be an integer".to_string())?;
    let addr: SocketAddr = addr.parse().map_err(|_| "invalid contact address".to_string())?;
    Ok((NodeID(id), addr))
}

fn main() -> Result<()> {
    submerge_admin::init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            id,
            dir,
            r,
            w,
            n,
            peer_bind,
            client_bind,
            quorum_timeout_ms,
            bootstrap,
            join,
            recover,
        } => {
            let config = Config {
                node_id: id,
                storage_path: dir,
                r,
                w,
                n,
                peer_bind,
                client_bind,
                quorum_timeout: Duration::from_millis(quorum_timeout_ms),
            };
            config.validate()?;

            let transport = Arc::new(TcpTransport::new());
            let self_handle = PeerHandle::Tcp(config.peer_bind);
            let (mut actor, mailbox) = NodeActor::new(config.clone(), transport, self_handle)?;

            let peer_addr = spawn_peer_listener(config.peer_bind, mailbox.clone())?;
            let client_addr = spawn_client_listener(config.client_bind, mailbox)?;
            tracing::info!(%peer_addr, %client_addr, "listening");

            let startup = match (bootstrap, join, recover) {
                (true, None, None) => StartupCommand::Bootstrap,
                (false, Some((contact_id, contact_addr)), None) => {
                    StartupCommand::Join { contact_id, contact_addr }
                }
                (false, None, Some((contact_id, contact_addr))) => {
                    StartupCommand::Recover { contact_id, contact_addr }
                }
                _ => return Err(err("exactly one of --bootstrap, --join, --recover is required")),
            };
            actor.start(startup)?;
            actor.run()
        }
        Commands::Client { connect, action } => {
            let client = Client::new(connect);
            let response = match action {
                ClientAction::Read { key } => client.read(key)?,
                ClientAction::Update { key, value } => client.update(key, value)?,
                ClientAction::Leave => client.leave()?,
            };
            print_response(&response);
            Ok(())
        }
        Commands::Demo { nodes, r, w, n } => run_demo(nodes, r, w, n),
    }
}

/// Bootstraps node 0, joins nodes 1..nodes against it, all on one process's
/// channel transport, then drives one update and one read through node 0 to
/// show the quorum round trip end to end.
fn run_demo(nodes: usize, r: usize, w: usize, n: usize) -> Result<()> {
    if nodes == 0 {
        return Err(err("--nodes must be at least 1"));
    }
    let transport = Arc::new(ChannelTransport::new());
    let base_dir = std::env::temp_dir().join(format!("submerge-demo-{}", std::process::id()));
    let mut mailboxes = Vec::with_capacity(nodes);

    for id in 0..nodes as i64 {
        let config = Config {
            node_id: id,
            storage_path: base_dir.join(id.to_string()),
            r,
            w,
            n,
            peer_bind: "127.0.0.1:0".parse().unwrap(),
            client_bind: "127.0.0.1:0".parse().unwrap(),
            quorum_timeout: Duration::from_millis(500),
        };
        config.validate()?;
        let (mut actor, mailbox) = NodeActor::new(config, transport.clone(), PeerHandle::Channel)?;
        transport.register(NodeID(id), mailbox.clone());
        if id == 0 {
            actor.start(StartupCommand::Bootstrap)?;
        } else {
            actor.start(StartupCommand::Join {
                contact_id: NodeID(0),
                contact_addr: "127.0.0.1:0".parse().unwrap(),
            })?;
        }
        thread::spawn(move || {
            let _ = actor.run();
        });
        mailboxes.push(mailbox);
        // Give each join a moment to settle before the next one starts, so
        // the ring this demo builds up is always in a sane intermediate
        // state to look at.
        thread::sleep(Duration::from_millis(150));
    }

    let coordinator = &mailboxes[0];
    match call(coordinator, ClientRequest::Update { key: 1, value: "hello".into() })? {
        ClientResponse::UpdateOk { node, key, value, version } => {
            println!("node {node}: key {key} updated to {value:?} @ version {version}");
        }
        other => println!("update failed: {other:?}"),
    }
    match call(coordinator, ClientRequest::Read { key: 1 })? {
        ClientResponse::ReadOk { node, key, value } => {
            println!("node {node}: key {key} = {value:?}");
        }
        other => println!("read failed: {other:?}"),
    }
    Ok(())
}

fn print_response(response: &ClientResponse) {
    match response {
        ClientResponse::ReadOk { node, key, value } => {
            println!("node {node}: key {key} = {value:?}");
        }
        ClientResponse::UpdateOk { node, key, value, version } => {
            println!("node {node}: key {key} updated to {value:?} @ version {version}");
        }
        ClientResponse::LeaveOk { node } => {
            println!("node {node}: left the ring");
        }
        ClientResponse::Error { node, message } => {
            eprintln!("node {node}: error: {message}");
        }
    }
}
