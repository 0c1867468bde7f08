//! Local chunk storage.
//!
//! A node stores chunk replicas it owns on the ring, plus bookkeeping
//! for replicas it admitted on paper but parked on another node because
//! its own capacity was exhausted. The byte storage itself sits behind
//! [`ChunkBackend`] so the placement logic can be tested in memory.

mod backend;
mod error;
mod store;

pub use backend::{ChunkBackend, FileBackend, MemoryBackend};
pub use error::StoreError;
pub use store::{ChunkRecord, ChunkStore, Fetched, Ownership, StoreReport};
