//! Network boundary for Krill peers.
//!
//! Two things live here:
//!
//! - The transport collaborator contract: [`SecureChannel`] / [`Connector`],
//!   an opaque secure, ordered, reliable byte channel with an explicit
//!   handshake step before use. The in-tree [`TcpConnector`] implements it
//!   over TCP with a shared-secret hello; tests substitute in-memory
//!   channels through the same trait.
//! - The wire codec: [`Request`] / [`Response`] with the textual header
//!   grammar (space-separated tokens, `RING` and `CHUNK` namespaces) and an
//!   optional binary body behind a `\r\n\r\n` delimiter.
//!
//! Every exchange is one synchronous request/response per connection:
//! connect, handshake, send, receive, close.

mod channel;
mod error;
mod wire;

pub use channel::{handshake_token, Connector, SecureChannel, TcpChannel, TcpConnector};
pub use error::NetError;
pub use wire::{Request, Response, BODY_DELIMITER, MAX_MESSAGE_SIZE};
