//! The peer node: ring membership, chunk placement, inbound dispatch
//! and the external control operations.
//!
//! Everything hangs off one owned [`PeerNode`]; there is no global
//! state. The transport is injected as a [`krill_net::Connector`], so
//! whole networks of peers can run in-process under test.

mod dispatcher;
mod error;
mod handoff;
mod node;
mod placement;
mod rpc;

#[cfg(test)]
mod tests;

pub use dispatcher::Dispatcher;
pub use error::PeerError;
pub use node::{BackupOutcome, PeerConfig, PeerNode};
pub use placement::Placement;
pub use rpc::NetRingRpc;
