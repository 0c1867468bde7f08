//! Authenticated point-to-point channels.
//!
//! Every exchange is one request and one reply over a fresh connection.
//! The orientation is fixed by a short handshake keyed on the cluster
//! secret: the initiator proves knowledge of the secret before any
//! payload flows. After the handshake the initiator writes its request
//! and half-closes; the responder reads to end-of-stream, writes the
//! reply and closes.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::NetError;
use crate::wire::MAX_MESSAGE_SIZE;

/// Longest handshake line either side will read.
const HANDSHAKE_LINE_MAX: usize = 64;

/// Derive the handshake token from the cluster secret.
///
/// Peers never send the secret itself on the wire, only this digest
/// prefix.
pub fn handshake_token(secret: &str) -> String {
    blake3::hash(secret.as_bytes()).to_hex().as_str()[..16].to_string()
}

/// One established, authenticated exchange.
#[async_trait::async_trait]
pub trait SecureChannel: Send {
    /// Write a complete message and close this side's write half.
    async fn send(&mut self, payload: &[u8]) -> Result<(), NetError>;

    /// Read a complete message, up to the peer's end-of-stream.
    async fn receive(&mut self) -> Result<Vec<u8>, NetError>;
}

/// Opens channels to remote peers.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Perform one request/reply exchange with `target`.
    async fn request(&self, target: SocketAddr, payload: &[u8]) -> Result<Vec<u8>, NetError>;
}

/// A [`SecureChannel`] over a plain TCP stream.
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Dial `target` and run the initiator side of the handshake.
    pub async fn connect(target: SocketAddr, secret: &str) -> Result<Self, NetError> {
        let mut stream = TcpStream::connect(target)
            .await
            .map_err(|e| NetError::Connect(format!("{target}: {e}")))?;
        let line = format!("KRILL {}\n", handshake_token(secret));
        stream.write_all(line.as_bytes()).await?;
        let reply = read_line(&mut stream).await?;
        if reply != "OK" {
            return Err(NetError::Handshake(format!(
                "unexpected greeting reply: {reply:?}"
            )));
        }
        Ok(Self { stream })
    }

    /// Run the responder side of the handshake on an accepted stream.
    pub async fn accept(mut stream: TcpStream, secret: &str) -> Result<Self, NetError> {
        let line = read_line(&mut stream).await?;
        let expected = format!("KRILL {}", handshake_token(secret));
        if line != expected {
            debug!("rejecting greeting with bad token");
            return Err(NetError::Handshake("bad greeting token".to_string()));
        }
        stream.write_all(b"OK\n").await?;
        Ok(Self { stream })
    }
}

#[async_trait::async_trait]
impl SecureChannel for TcpChannel {
    async fn send(&mut self, payload: &[u8]) -> Result<(), NetError> {
        self.stream.write_all(payload).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, NetError> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(buf);
            }
            if buf.len() + n > MAX_MESSAGE_SIZE {
                return Err(NetError::TooLarge {
                    len: buf.len() + n,
                    max: MAX_MESSAGE_SIZE,
                });
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// [`Connector`] that dials fresh TCP connections.
pub struct TcpConnector {
    secret: String,
    timeout: Duration,
}

impl TcpConnector {
    /// Connector with the default per-exchange timeout.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the per-exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn request(&self, target: SocketAddr, payload: &[u8]) -> Result<Vec<u8>, NetError> {
        debug!(%target, bytes = payload.len(), "exchange");
        let exchange = async {
            let mut channel = TcpChannel::connect(target, &self.secret).await?;
            channel.send(payload).await?;
            channel.receive().await
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| NetError::Timeout)?
    }
}

/// Read one `\n`-terminated line, without the terminator.
///
/// Byte-at-a-time is fine here: handshake lines are tiny and this never
/// over-reads into the message that follows.
async fn read_line(stream: &mut TcpStream) -> Result<String, NetError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(NetError::Handshake("peer closed mid-greeting".to_string()));
        }
        if byte[0] == b'\n' {
            return String::from_utf8(line)
                .map_err(|_| NetError::Handshake("greeting is not valid UTF-8".to_string()));
        }
        if line.len() >= HANDSHAKE_LINE_MAX {
            return Err(NetError::Handshake("greeting line too long".to_string()));
        }
        line.push(byte[0]);
    }
}
