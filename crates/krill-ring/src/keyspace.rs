//! Deterministic hashing into the circular id space.
//!
//! Every ring position is derived the same way: join the input parts with
//! `"_"`, digest with blake3, take the first 8 digest bytes as a big-endian
//! `u64`, then shift right one byte at a time until the value fits the
//! modulus. Not cryptographically sound as a reduction, but deterministic
//! and bit-for-bit reproducible given identical inputs, which is what
//! interoperability requires.

use std::net::SocketAddr;

use krill_types::{FileId, NodeRef, RingId};

/// The circular identifier space: ids are `u64` values in `[0, 2^bits)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpace {
    bits: u32,
}

impl KeySpace {
    /// Create a key space with `2^bits` identifiers.
    ///
    /// `bits` must be in `1..=63`.
    pub fn new(bits: u32) -> Self {
        assert!((1..=63).contains(&bits), "key space bits must be 1..=63");
        Self { bits }
    }

    /// Number of bits in an identifier.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of identifiers on the ring (`2^bits`).
    pub fn modulus(&self) -> u64 {
        1u64 << self.bits
    }

    /// Hash arbitrary parts into a ring id.
    pub fn hash_parts(&self, parts: &[&str]) -> RingId {
        let joined = parts.join("_");
        let digest = blake3::hash(joined.as_bytes());
        let bytes: [u8; 8] = digest.as_bytes()[..8].try_into().expect("8 bytes");
        let mut value = u64::from_be_bytes(bytes);
        // Repeated truncation: drop a byte until the value fits.
        while value >= self.modulus() {
            value >>= 8;
        }
        RingId(value)
    }

    /// Ring id of a node, from its transport address.
    pub fn node_id(&self, addr: &SocketAddr) -> RingId {
        self.hash_parts(&[&addr.ip().to_string(), &addr.port().to_string()])
    }

    /// Build a [`NodeRef`] for an address.
    pub fn node_ref(&self, addr: SocketAddr) -> NodeRef {
        NodeRef {
            id: self.node_id(&addr),
            addr,
        }
    }

    /// Placement id for one replica of one chunk.
    pub fn placement_id(&self, file_id: &FileId, chunk_no: u32, copy_index: u32) -> RingId {
        self.hash_parts(&[
            file_id.as_str(),
            &chunk_no.to_string(),
            &copy_index.to_string(),
        ])
    }

    /// Ideal id of finger table entry `i` for a node at `id`:
    /// `(id + 2^i) mod 2^bits`.
    pub fn finger_id(&self, id: RingId, i: u32) -> RingId {
        debug_assert!(i < self.bits);
        RingId(id.0.wrapping_add(1u64 << i) & (self.modulus() - 1))
    }
}

/// True if `id` lies strictly between `lo` and `hi` going clockwise.
///
/// When `hi <= lo` the interval wraps past zero. A degenerate interval
/// (`lo == hi`) covers the whole circle except the endpoint itself.
pub fn in_open(id: RingId, lo: RingId, hi: RingId) -> bool {
    if hi > lo {
        id > lo && id < hi
    } else {
        id > lo || id < hi
    }
}

/// True if `id` lies in the clockwise interval `(lo, hi]`.
///
/// When `hi <= lo` the interval wraps past zero. A degenerate interval
/// (`lo == hi`) covers the whole circle: a node that is its own successor
/// owns every id.
pub fn in_half_open(id: RingId, lo: RingId, hi: RingId) -> bool {
    if hi > lo {
        id > lo && id <= hi
    } else {
        id > lo || id <= hi
    }
}
