//! `krilld` — the Krill backup peer daemon.
//!
//! Binary entrypoint: parses the CLI, loads the TOML config, and either
//! runs a peer node or talks to a running one over the control socket.
//!
//! # Usage
//!
//! ```text
//! krilld start                              # start a fresh ring
//! krilld start -c krill.toml                # start with a config file
//! krilld start --join 10.0.0.1:4700        # join an existing ring
//! krilld backup /home/user/file.txt -r 3   # control a running daemon
//! krilld restore /home/user/file.txt
//! krilld delete /home/user/file.txt
//! krilld reclaim 1048576
//! krilld status
//! ```

mod config;
mod control;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use krill_net::TcpConnector;
use krill_peer::{PeerConfig, PeerNode};
use krill_store::{ChunkBackend, FileBackend, MemoryBackend};
use tokio::net::TcpListener;
use tracing::{info, warn};

use config::CliConfig;

/// Fallback shared secret for rings started without one.
const DEV_SECRET: &str = "krill-dev";

#[derive(Parser)]
#[command(name = "krilld", version, about = "Krill decentralized backup peer")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the peer: create a fresh ring, or join through --join.
    Start {
        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Override the peer listen address (e.g. "0.0.0.0:4700").
        #[arg(short, long)]
        listen: Option<String>,

        /// Join an existing ring through this peer ("host:port").
        #[arg(short, long)]
        join: Option<String>,

        /// Shared ring secret (all members must agree).
        #[arg(long, env = "KRILL_SECRET")]
        secret: Option<String>,

        /// Storage limit in bytes.
        #[arg(long)]
        max_storage: Option<u64>,

        /// Run fully in-memory (no disk persistence for chunks).
        #[arg(short, long)]
        memory: bool,
    },

    /// Back a file up with the given replication degree.
    Backup {
        path: String,
        /// Copies to place per chunk.
        #[arg(short, long, default_value = "3")]
        replication: u32,
    },

    /// Restore a backed-up file into the staging directory.
    Restore { path: String },

    /// Delete a backup from the network.
    Delete { path: String },

    /// Change the storage limit: a byte count, or "unlimited".
    Reclaim { max: String },

    /// Show ring position, storage and backups of the running peer.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start {
            data_dir,
            listen,
            join,
            secret,
            max_storage,
            memory,
        } => {
            // CLI args override config file values.
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if let Some(addr) = listen {
                config.node.listen_addr = addr;
            }
            if let Some(s) = secret {
                config.node.secret = s;
            }
            if let Some(max) = max_storage {
                config.storage.max_bytes = Some(max);
            }
            if memory {
                config.storage.backend = "memory".to_string();
            }
            cmd_start(config, join).await
        }
        Commands::Backup { path, replication } => {
            cmd_control(&config, &format!("BACKUP {replication} {path}")).await
        }
        Commands::Restore { path } => cmd_control(&config, &format!("RESTORE {path}")).await,
        Commands::Delete { path } => cmd_control(&config, &format!("DELETE {path}")).await,
        Commands::Reclaim { max } => cmd_control(&config, &format!("RECLAIM {max}")).await,
        Commands::Status => cmd_control(&config, "STATUS").await,
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn cmd_start(config: CliConfig, join: Option<String>) -> Result<()> {
    info!("starting krilld");
    let listen_addr = config.listen_addr()?;
    let control_addr = config.control_addr()?;
    info!(
        %listen_addr,
        %control_addr,
        data_dir = %config.node.data_dir.display(),
        backend = %config.storage.backend,
        chunk_size = config.chunk_size(),
        max_bytes = ?config.storage.max_bytes,
        "node configuration"
    );

    let mut secret = config.node.secret.clone();
    if secret.is_empty() {
        warn!("no shared secret configured, using the development default");
        secret = DEV_SECRET.to_string();
    }

    let memory_mode = config.storage.backend == "memory";
    let backend: Arc<dyn ChunkBackend> = if memory_mode {
        Arc::new(MemoryBackend::new())
    } else {
        Arc::new(FileBackend::new(config.node.data_dir.join("chunks")))
    };

    let mut peer_config = PeerConfig::for_addr(listen_addr);
    peer_config.bits = config.bits();
    peer_config.max_hops = config.max_hops();
    peer_config.capacity = config.storage.max_bytes;
    peer_config.chunk_size = config.chunk_size();
    peer_config.max_file_size = config.max_file_size();
    peer_config.placement_attempts = config.placement_attempts();
    peer_config.placement_backoff = config.placement_backoff();
    peer_config.stabilize_period = config.stabilize_period();
    peer_config.workers = config.workers();
    peer_config.restored_dir = config.node.data_dir.join("restored");

    if !memory_mode {
        std::fs::create_dir_all(&config.node.data_dir)
            .context("failed to create data directory")?;
    }

    let connector = Arc::new(TcpConnector::new(secret.clone()));
    let node = Arc::new(PeerNode::new(peer_config, connector, backend));
    info!(local = %node.local(), "peer identity");

    match join {
        Some(bootstrap) => {
            let bootstrap = bootstrap
                .parse()
                .map_err(|e| anyhow::anyhow!("bad --join address {bootstrap:?}: {e}"))?;
            node.join(bootstrap).await.context("failed to join ring")?;
        }
        None => node.create(),
    }

    let peer_listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    let control_listener = TcpListener::bind(control_addr)
        .await
        .with_context(|| format!("failed to bind control socket {control_addr}"))?;

    node.spawn_maintenance();
    let serve_node = node.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_node.serve(peer_listener, secret).await {
            tracing::error!(error = %e, "peer listener failed");
        }
    });

    control::serve(control_listener, node).await
}

async fn cmd_control(config: &CliConfig, line: &str) -> Result<()> {
    let addr = config.control_addr()?;
    let reply = control::request(addr, line)
        .await
        .with_context(|| format!("is krilld running on {addr}?"))?;
    println!("{reply}");
    if reply.starts_with("ERR") {
        std::process::exit(1);
    }
    Ok(())
}
