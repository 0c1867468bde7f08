use krill_types::ChunkKey;

/// Errors from the local chunk store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The replica is not known to this node.
    #[error("chunk not found: {0}")]
    NotFound(ChunkKey),

    /// Admitting the replica would exceed the configured capacity.
    #[error("capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded {
        /// Size of the replica that was refused.
        needed: u64,
        /// Bytes still free under the current capacity.
        available: u64,
    },

    /// The replica is mid-transfer to a new owner; admissions for it
    /// are refused until the transfer settles, so a bounced delegation
    /// cannot alias the copy being moved.
    #[error("handoff of {0} in flight")]
    HandoffInFlight(ChunkKey),

    /// A reclaim could not shrink usage down to the requested target.
    #[error("reclaim blocked: {used} bytes still held, target {target}")]
    ReclaimBlocked {
        /// The requested capacity target.
        target: u64,
        /// Bytes still in use after evicting what could be evicted.
        used: u64,
    },

    /// Backend I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
