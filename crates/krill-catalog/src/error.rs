/// Errors from the backup catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The file is larger than the configured backup limit.
    #[error("file too large: {size} bytes, limit {max}")]
    FileTooLarge {
        /// Size of the offending file.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// No backup of this path is tracked by this node.
    #[error("path not tracked: {0}")]
    NotTracked(String),

    /// A chunk is missing from a reassembly input.
    #[error("missing chunk {chunk_no} during reassembly")]
    MissingChunk {
        /// The absent chunk number.
        chunk_no: u32,
    },
}
