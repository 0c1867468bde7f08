//! Shared types and identifiers for Krill.
//!
//! This crate defines the value types used across the Krill workspace:
//! ring identifiers ([`RingId`]), file identity ([`FileId`]), the
//! structural chunk key ([`ChunkKey`]), and node references ([`NodeRef`]).

use std::fmt;
use std::net::SocketAddr;

/// Position on the circular identifier space.
///
/// A `RingId` is an unsigned integer in `[0, 2^M)` where `M` is fixed by
/// the `KeySpace` that produced it. The type itself carries no modulus;
/// all interval arithmetic lives in `krill-ring`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RingId(pub u64);

impl RingId {
    /// Return the raw integer value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingId({})", self.0)
    }
}

impl From<u64> for RingId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identity of a backed-up file: hex digest over path, modification time
/// and content.
///
/// Two backups of the same path produce the same `FileId` only if neither
/// the content nor the modification time changed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(String);

impl FileId {
    /// Wrap an already-computed hex identifier.
    ///
    /// Returns `None` if the token is empty or contains whitespace, which
    /// would break the space-delimited wire header.
    pub fn parse(token: &str) -> Option<Self> {
        if token.is_empty() || token.contains(char::is_whitespace) {
            return None;
        }
        Some(Self(token.to_string()))
    }

    /// Derive a file id from its path, modification time and content.
    pub fn for_file(path: &str, modified_unix_secs: u64, content: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&modified_unix_secs.to_be_bytes());
        hasher.update(content);
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", &self.0[..self.0.len().min(12)])
    }
}

/// Structural key identifying one replica of one chunk.
///
/// Replaces string-concatenation keys (`"{fileId}_{chunkNo}"`): keying
/// structurally avoids accidental collisions and lets per-file bulk scans
/// match on fields instead of string prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    /// The file this chunk belongs to.
    pub file_id: FileId,
    /// Chunk index within the file, starting at 1.
    pub chunk_no: u32,
    /// Replica slot, `0..replication_degree`.
    pub copy_index: u32,
}

impl ChunkKey {
    /// Build a key for one replica of a chunk.
    pub fn new(file_id: FileId, chunk_no: u32, copy_index: u32) -> Self {
        Self {
            file_id,
            chunk_no,
            copy_index,
        }
    }

    /// True if this key names any copy of the given chunk.
    pub fn is_chunk(&self, file_id: &FileId, chunk_no: u32) -> bool {
        self.file_id == *file_id && self.chunk_no == chunk_no
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.file_id, self.chunk_no, self.copy_index)
    }
}

/// Reference to a ring node: its id plus the address to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// The node's position on the ring (hash of its address).
    pub id: RingId,
    /// Transport address of the node.
    pub addr: SocketAddr,
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}
