use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use meshwire::broadcast::{Broadcaster, BroadcasterConfig};
use meshwire::cast::Caster;
use meshwire::dht::{Dht, PeerDirectory};
use meshwire::event::{event_queue, Event};
use meshwire::message::message_queue;
use meshwire::peer::{PeerAddress, PeerID};
use meshwire::pingpong::PingPonger;
use meshwire::router::Router;
use meshwire::signer::{Ed25519SignVerifier, Keypair};
use meshwire::store::SledTable;
use meshwire::tcp::{Client, ClientOptions, Server, ServerOptions};
use tokio_util::sync::CancellationToken;

/// A bootstrap peer in `IP:PORT/PEER_ID` form.
#[derive(Clone, Debug)]
struct BootstrapPeer {
    addr: SocketAddr,
    id: PeerID,
}

impl FromStr for BootstrapPeer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr_part, id_part) = s
            .rsplit_once('/')
            .context("bootstrap peer must include a peer id (format: IP:PORT/PEER_ID)")?;

        let addr: SocketAddr = addr_part.parse().context("invalid socket address")?;
        let id = PeerID::from_hex(id_part).context("invalid hex peer id")?;
        Ok(BootstrapPeer { addr, id })
    }
}

#[derive(Parser, Debug)]
#[command(name = "meshwire")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    #[arg(short = 'B', long = "bootstrap", value_name = "PEER")]
    bootstrap: Vec<BootstrapPeer>,

    /// Directory for the persistent peer table. In-memory when omitted.
    #[arg(short, long)]
    store: Option<std::path::PathBuf>,

    #[arg(long, default_value = "256")]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let keypair = Keypair::generate();
    let me = PeerAddress::new(keypair.peer_id(), args.bind, meshwire::event::now_ms());
    info!(peer = %me.id, "node identity");

    let table = match &args.store {
        Some(path) => Some(Box::new(SledTable::open(path, "peers")?) as Box<dyn meshwire::store::Table>),
        None => None,
    };
    let bootstrap: Vec<_> = args
        .bootstrap
        .iter()
        .map(|p| PeerAddress::new(p.id, p.addr, 0))
        .collect();
    let dht = Dht::new(me, table, bootstrap)?;

    let (out_tx, out_rx) = message_queue(args.queue_capacity);
    let (in_tx, in_rx) = message_queue(args.queue_capacity);
    let (evt_tx, mut evt_rx) = event_queue(args.queue_capacity);

    let trusted: Vec<_> = args.bootstrap.iter().map(|p| p.id).collect();
    let sign_verifier = Arc::new(Ed25519SignVerifier::new(keypair, trusted));

    let pingponger = Arc::new(PingPonger::new(dht.clone(), out_tx.clone(), evt_tx.clone()));
    let caster = Arc::new(Caster::new(dht.clone(), out_tx.clone(), evt_tx.clone()));
    let broadcaster = Arc::new(Broadcaster::new(
        BroadcasterConfig::default(),
        dht.clone(),
        out_tx.clone(),
        evt_tx,
    ));
    let router = Router::new(pingponger.clone(), caster, broadcaster);

    let ctx = CancellationToken::new();

    let server = Server::new(ServerOptions::default(), sign_verifier.clone(), in_tx);
    let server_ctx = ctx.clone();
    let bind = args.bind;
    tokio::spawn(async move {
        if let Err(e) = server.listen(server_ctx, bind).await {
            warn!(error = %e, "tcp server stopped");
        }
    });

    let client = Client::new(ClientOptions::default(), sign_verifier);
    let client_ctx = ctx.clone();
    tokio::spawn(async move { client.run(client_ctx, out_rx).await });

    let router_ctx = ctx.clone();
    tokio::spawn(async move { router.run(router_ctx, in_rx).await });

    // Announce ourselves to every bootstrap peer.
    for peer in dht.peer_addresses() {
        if let Err(e) = pingponger.ping(&ctx, peer.id).await {
            warn!(peer = %peer.id, error = %e, "bootstrap ping failed");
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, exiting gracefully");
                ctx.cancel();
                return Ok(());
            }
            event = evt_rx.recv() => {
                match event {
                    Some(Event::MessageReceived { body, from, .. }) => {
                        info!(bytes = body.len(), from = ?from, "message received");
                    }
                    Some(Event::PeerChanged { peer_address, .. }) => {
                        info!(peer = %peer_address.id, addr = %peer_address.addr, "peer changed");
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}
