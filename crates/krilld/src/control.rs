//! Line-based control socket.
//!
//! One command per connection: the client writes a single line, the
//! daemon answers with text and closes. This is the local surface the
//! `krilld` subcommands talk to; it is not part of the peer protocol.

use std::net::SocketAddr;
use std::sync::Arc;

use krill_peer::PeerNode;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// A parsed control command.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Backup { replication: u32, path: String },
    Restore { path: String },
    Delete { path: String },
    Reclaim { max_bytes: Option<u64> },
    Status,
}

/// Parse one control line. Paths keep their internal spaces.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(' ') {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    match verb.to_ascii_uppercase().as_str() {
        "BACKUP" => {
            let (rep, path) = rest
                .split_once(' ')
                .ok_or_else(|| "usage: BACKUP <replication> <path>".to_string())?;
            let replication: u32 = rep
                .parse()
                .map_err(|_| format!("bad replication degree {rep:?}"))?;
            if replication == 0 {
                return Err("replication degree must be at least 1".to_string());
            }
            Ok(Command::Backup {
                replication,
                path: path.trim().to_string(),
            })
        }
        "RESTORE" if !rest.is_empty() => Ok(Command::Restore {
            path: rest.to_string(),
        }),
        "DELETE" if !rest.is_empty() => Ok(Command::Delete {
            path: rest.to_string(),
        }),
        "RECLAIM" => {
            if rest.eq_ignore_ascii_case("unlimited") {
                Ok(Command::Reclaim { max_bytes: None })
            } else {
                let max_bytes: u64 = rest
                    .parse()
                    .map_err(|_| format!("bad storage limit {rest:?}"))?;
                Ok(Command::Reclaim {
                    max_bytes: Some(max_bytes),
                })
            }
        }
        "STATUS" => Ok(Command::Status),
        _ => Err(format!("unknown command {verb:?}")),
    }
}

/// Run a command against the local peer, producing the reply text.
pub async fn execute(node: &PeerNode, command: Command) -> String {
    match command {
        Command::Backup { replication, path } => match node.backup(&path, replication).await {
            Ok(outcome) => format!(
                "OK backed up {} as {} ({} chunks, {}/{} copies stored)",
                path, outcome.file_id, outcome.chunks, outcome.copies_stored,
                outcome.copies_requested
            ),
            Err(e) => format!("ERR {e}"),
        },
        Command::Restore { path } => match node.restore(&path).await {
            Ok(dest) => format!("OK restored to {}", dest.display()),
            Err(e) => format!("ERR {e}"),
        },
        Command::Delete { path } => match node.delete(&path).await {
            Ok(acked) => format!("OK deleted {path} ({acked} replicas acknowledged)"),
            Err(e) => format!("ERR {e}"),
        },
        Command::Reclaim { max_bytes } => match node.reclaim(max_bytes).await {
            Ok(()) => match max_bytes {
                Some(max) => format!("OK storage limit now {max} bytes"),
                None => "OK storage limit lifted".to_string(),
            },
            Err(e) => format!("ERR {e}"),
        },
        Command::Status => node.state_report(),
    }
}

/// Serve control connections forever.
pub async fn serve(listener: TcpListener, node: Arc<PeerNode>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "control socket ready");
    loop {
        let (stream, remote) = listener.accept().await?;
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = handle(stream, &node).await {
                debug!(%remote, error = %e, "control connection failed");
            }
        });
    }
}

async fn handle(stream: TcpStream, node: &PeerNode) -> anyhow::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let reply = match parse_command(&line) {
        Ok(command) => execute(node, command).await,
        Err(e) => {
            warn!(error = %e, "bad control command");
            format!("ERR {e}")
        }
    };
    let mut stream = reader.into_inner();
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Client side: send one command line, return the daemon's reply.
pub async fn request(addr: SocketAddr, line: &str) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}
