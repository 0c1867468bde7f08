//! Error types for network operations.

/// Errors that can occur on the transport boundary or in the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to establish a connection to a remote peer.
    #[error("connect error: {0}")]
    Connect(String),

    /// An I/O error on an established channel.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake step failed; the channel must not be used.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An inbound message did not match the wire grammar.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// An inbound message exceeded the size guard.
    #[error("message too large: {len} bytes (max {max})")]
    TooLarge {
        /// Observed length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A remote call exceeded its fixed timeout.
    ///
    /// Treated identically to a remote error: no retry at this layer.
    #[error("remote call timed out")]
    Timeout,
}
