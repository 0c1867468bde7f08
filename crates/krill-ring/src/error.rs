//! Error types for ring operations.

use krill_types::RingId;

/// Errors that can occur during ring routing and maintenance.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// A remote node could not be reached or timed out.
    ///
    /// The node is presumed failed; retries belong to the caller.
    #[error("node unreachable: {0}")]
    Unreachable(String),

    /// A routing chain exceeded the hop bound without settling on an owner.
    #[error("routing for id {id} exhausted after {hops} hops")]
    RoutingExhausted {
        /// The id being resolved.
        id: RingId,
        /// The configured hop bound.
        hops: u32,
    },

    /// A remote reply did not match the wire grammar.
    #[error("protocol error: {0}")]
    Protocol(String),
}
