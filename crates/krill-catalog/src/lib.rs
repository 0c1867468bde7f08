//! Bookkeeping for locally-initiated backups.
//!
//! The catalog remembers which files this node asked the network to
//! keep, how many copies were requested, and how many each chunk is
//! believed to have. It also owns the pure chunking and reassembly
//! helpers; all file I/O stays with the caller.

mod catalog;
mod chunker;
mod error;

pub use catalog::{ChunkDescriptor, FileCatalog, FileRecord};
pub use chunker::{chunkify, reassemble, DEFAULT_CHUNK_SIZE};
pub use error::CatalogError;
