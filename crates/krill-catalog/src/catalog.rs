use std::collections::HashMap;
use std::sync::Mutex;

use krill_types::FileId;
use tracing::debug;

use crate::error::CatalogError;

/// Per-chunk state inside a [`FileRecord`].
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub chunk_no: u32,
    pub size: u64,
    /// Copies believed to exist, updated from placement acks.
    pub observed: u32,
}

/// One locally-initiated backup.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub file_id: FileId,
    pub path: String,
    pub desired: u32,
    /// Ordered by chunk number, starting at 1.
    pub chunks: Vec<ChunkDescriptor>,
}

/// The node's backup ledger.
pub struct FileCatalog {
    max_file_size: u64,
    files: Mutex<HashMap<FileId, FileRecord>>,
}

impl FileCatalog {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Reject files over the backup size limit before any chunking.
    pub fn check_file_size(&self, size: u64) -> Result<(), CatalogError> {
        if size > self.max_file_size {
            return Err(CatalogError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Start tracking a backup. Chunk sizes arrive in chunk order; the
    /// descriptors are numbered from 1. Re-registering a file id resets
    /// its record.
    pub fn register(&self, file_id: FileId, path: String, desired: u32, chunk_sizes: &[u64]) {
        let chunks = chunk_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| ChunkDescriptor {
                chunk_no: i as u32 + 1,
                size: *size,
                observed: 0,
            })
            .collect();
        debug!(%file_id, path, desired, chunks = chunk_sizes.len(), "backup registered");
        self.files.lock().expect("lock poisoned").insert(
            file_id.clone(),
            FileRecord {
                file_id,
                path,
                desired,
                chunks,
            },
        );
    }

    /// Record one more successfully stored copy of a chunk.
    pub fn note_stored(&self, file_id: &FileId, chunk_no: u32) {
        let mut files = self.files.lock().expect("lock poisoned");
        if let Some(record) = files.get_mut(file_id) {
            if let Some(chunk) = record.chunks.iter_mut().find(|c| c.chunk_no == chunk_no) {
                chunk.observed += 1;
            }
        }
    }

    /// Look a backup up by the path it was requested with.
    pub fn by_path(&self, path: &str) -> Result<FileRecord, CatalogError> {
        self.files
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|r| r.path == path)
            .cloned()
            .ok_or_else(|| CatalogError::NotTracked(path.to_string()))
    }

    /// Stop tracking a backup.
    pub fn remove(&self, file_id: &FileId) -> Option<FileRecord> {
        self.files.lock().expect("lock poisoned").remove(file_id)
    }

    /// All tracked backups, for status reporting.
    pub fn records(&self) -> Vec<FileRecord> {
        self.files
            .lock()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}
