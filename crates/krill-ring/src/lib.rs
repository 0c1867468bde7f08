//! Chord-style ring overlay for Krill.
//!
//! This crate implements the ring protocol: deterministic identity hashing
//! into a circular `2^M` id space ([`KeySpace`]), this node's ring state and
//! routing ([`Ring`]), and the periodic maintenance task that keeps the ring
//! converged ([`Stabilizer`]).
//!
//! Remote calls go through the [`RingRpc`] trait so the routing logic can be
//! exercised in tests without a network.

mod error;
mod keyspace;
mod node;
mod stabilizer;

pub use error::RingError;
pub use keyspace::{in_open, in_half_open, KeySpace};
pub use node::{Ring, RingSnapshot};
pub use stabilizer::Stabilizer;

use krill_types::{NodeRef, RingId};

/// Remote ring operations, one blocking call per invocation.
///
/// Implementations are expected to apply a fixed timeout and report a
/// timeout identically to a remote error. Retry policy does not live here:
/// a failure is surfaced to the caller as [`RingError::Unreachable`].
#[async_trait::async_trait]
pub trait RingRpc: Send + Sync {
    /// Ask `target` for one routing step towards `id`.
    ///
    /// The remote answers with its successor when it owns the lookup, or
    /// with its closest preceding finger otherwise. Finality is decided by
    /// the caller (see [`Ring::find_successor`]).
    async fn find_successor(&self, target: NodeRef, id: RingId) -> Result<NodeRef, RingError>;

    /// Ask `target` for its current predecessor.
    async fn get_predecessor(&self, target: NodeRef) -> Result<Option<NodeRef>, RingError>;

    /// Tell `target` that `candidate` might be its predecessor.
    async fn notify(&self, target: NodeRef, candidate: NodeRef) -> Result<(), RingError>;

    /// Liveness-probe `target` (handshake only). `false` means presumed dead.
    async fn probe(&self, target: NodeRef) -> bool;
}
