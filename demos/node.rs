use std::{str::FromStr, time::Duration};

use kadnode::{Dht, FindValue, Id};

use clap::Parser;

use tracing::{info, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Bootstrap node as host:port, can be repeated
    #[arg(short, long)]
    bootstrap: Vec<String>,
    /// Hex key to announce to the bootstrap nodes, served on this node's port
    #[arg(long)]
    announce: Option<String>,
    /// Hex key to look up on the bootstrap nodes
    #[arg(long)]
    lookup: Option<String>,
    /// Log every datagram
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::TRACE
        } else {
            Level::INFO
        })
        .with_thread_names(true)
        .init();

    let mut builder = Dht::builder().bootstrap(&cli.bootstrap);
    if let Some(port) = cli.port {
        builder = builder.port(port);
    }

    let dht = builder.build().expect("Failed to start DHT node");

    info!(id = %dht.id(), local_addr = ?dht.local_addr(), "Node is running, press Ctrl+C to stop");

    let responding = dht.bootstrap();
    info!(responding, total = cli.bootstrap.len(), "Bootstrapped");

    let bootstrap: Vec<_> = dht.routing_table().to_owned_nodes();

    if let Some(key) = cli.announce {
        let key = Id::from_str(&key).expect("invalid key");

        for node in &bootstrap {
            match dht.store(node.address, key, dht.local_addr().port()) {
                Ok(()) => info!(node = %node.id.short(), "Announced {}", key.short()),
                Err(error) => info!(node = %node.id.short(), %error, "Announce failed"),
            }
        }
    }

    if let Some(key) = cli.lookup {
        let key = Id::from_str(&key).expect("invalid key");

        for node in &bootstrap {
            match dht.find_value(node.address, key) {
                Ok(FindValue::Found(holders)) => {
                    for holder in holders {
                        info!(holder = %holder.id.short(), address = ?holder.address, "Found holder");
                    }
                }
                Ok(FindValue::Closest(nodes)) => {
                    info!(node = %node.id.short(), closest = nodes.len(), "No holders, got closest nodes")
                }
                Err(error) => info!(node = %node.id.short(), %error, "Lookup failed"),
            }
        }
    }

    let (tx, rx) = flume::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .expect("Error setting Ctrl-C handler");

    loop {
        match rx.recv_timeout(Duration::from_secs(30)) {
            Ok(()) => break,
            Err(_) => {
                let table = dht.routing_table();
                info!(nodes = table.size(), "=== Routing table ===");
            }
        }
    }

    dht.shutdown();
}
