//! `ringcensus-node`: a demo binary that boots one membership node and logs
//! its view as the cluster changes around it. Process-lifecycle wrapping and
//! CLI ergonomics are the only concerns here — the protocol itself lives
//! entirely in the library crates this binary assembles.

use anyhow::{Context, Result};
use clap::Parser;
use ringcensus_core::{ClusterConfig, Endpoint};
use ringcensus_service::{Cluster, ClusterOptions, Event};
use std::collections::BTreeMap;
use tokio::signal;
use tracing::{error, info};

/// Start or join a ring-census membership cluster.
#[derive(Parser, Debug)]
#[command(name = "ringcensus-node", about = "Deterministic multi-ring membership node")]
struct Args {
    /// This node's own address, e.g. 127.0.0.1:7000.
    #[arg(long)]
    listen: String,

    /// An existing member's address to join through. Omit to bootstrap a
    /// brand-new single-member cluster.
    #[arg(long)]
    seed: Option<String>,

    /// Key=value metadata pairs attached to this node's membership record.
    /// May be repeated.
    #[arg(long = "metadata", value_parser = parse_metadata_pair)]
    metadata: Vec<(String, String)>,
}

fn parse_metadata_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("ringcensus=info".parse()?))
        .json()
        .init();

    let args = Args::parse();
    let listen = Endpoint::parse(&args.listen).context("--listen must be host:port")?;
    let metadata: BTreeMap<String, String> = args.metadata.into_iter().collect();
    let config = ClusterConfig::default();
    let options = ClusterOptions::builder().metadata(metadata).build();

    let cluster = match args.seed {
        None => {
            info!(%listen, "bootstrapping new cluster");
            Cluster::start(listen, config, options).await.context("failed to bootstrap cluster")?
        }
        Some(seed) => {
            let seed = Endpoint::parse(&seed).context("--seed must be host:port")?;
            info!(%listen, %seed, "joining existing cluster");
            Cluster::join(listen, seed, config, options).await.context("failed to join cluster")?
        }
    };

    cluster.subscribe(
        Event::ViewChange,
        Box::new(|payload| {
            if let Some(view) = &payload.view {
                info!(config_id = %payload.config_id, members = ?view.members(), "view changed");
            }
        }),
    );
    cluster.subscribe(
        Event::Kicked,
        Box::new(|payload| {
            error!(config_id = %payload.config_id, "this node was removed from the cluster");
        }),
    );

    info!(
        members = ?cluster.member_list().await,
        size = cluster.membership_size().await,
        "node running"
    );

    if let Err(err) = signal::ctrl_c().await {
        error!(%err, "unable to listen for shutdown signal");
    } else {
        info!("received shutdown signal, stopping node");
    }

    cluster.shutdown().await;
    Ok(())
}
