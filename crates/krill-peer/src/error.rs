use krill_types::FileId;

/// Errors surfaced by peer-level operations.
///
/// Single-hop failures are absorbed where a fallback exists (next
/// replica, delegation, pointer reset); only exhaustion of all
/// fallbacks reaches the caller as one of these.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Network(#[from] krill_net::NetError),

    #[error(transparent)]
    Ring(#[from] krill_ring::RingError),

    #[error(transparent)]
    Store(#[from] krill_store::StoreError),

    #[error(transparent)]
    Catalog(#[from] krill_catalog::CatalogError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The remote answered with something other than what was asked for.
    #[error("inconsistent response: {0}")]
    Consistency(String),

    /// Every replica of a chunk failed to come back.
    #[error("no replica of {file_id}/{chunk_no} could be retrieved")]
    ChunkUnavailable {
        /// File being restored.
        file_id: FileId,
        /// Chunk that could not be fetched.
        chunk_no: u32,
    },
}
