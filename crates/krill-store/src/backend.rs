use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use bytes::Bytes;
use krill_types::ChunkKey;

use crate::error::StoreError;

/// Byte storage for chunk replicas.
#[async_trait::async_trait]
pub trait ChunkBackend: Send + Sync {
    /// Persist the replica. Overwrites are atomic.
    async fn write(&self, key: &ChunkKey, body: &Bytes) -> Result<(), StoreError>;

    /// Load the replica's bytes.
    async fn read(&self, key: &ChunkKey) -> Result<Bytes, StoreError>;

    /// Drop the replica. Removing an absent replica is not an error.
    async fn remove(&self, key: &ChunkKey) -> Result<(), StoreError>;
}

/// In-memory backend for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryBackend {
    chunks: Mutex<HashMap<ChunkKey, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChunkBackend for MemoryBackend {
    async fn write(&self, key: &ChunkKey, body: &Bytes) -> Result<(), StoreError> {
        self.chunks
            .lock()
            .expect("lock poisoned")
            .insert(key.clone(), body.clone());
        Ok(())
    }

    async fn read(&self, key: &ChunkKey) -> Result<Bytes, StoreError> {
        self.chunks
            .lock()
            .expect("lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn remove(&self, key: &ChunkKey) -> Result<(), StoreError> {
        self.chunks.lock().expect("lock poisoned").remove(key);
        Ok(())
    }
}

/// Backend that lays replicas out under a root directory, one
/// subdirectory per file id.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn chunk_path(&self, key: &ChunkKey) -> PathBuf {
        self.root
            .join(key.file_id.as_str())
            .join(format!("{}_{}", key.chunk_no, key.copy_index))
    }
}

#[async_trait::async_trait]
impl ChunkBackend for FileBackend {
    async fn write(&self, key: &ChunkKey, body: &Bytes) -> Result<(), StoreError> {
        let path = self.chunk_path(key);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        // Write-then-rename so a crash never leaves a torn replica.
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(&self, key: &ChunkKey) -> Result<Bytes, StoreError> {
        match tokio::fs::read(self.chunk_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &ChunkKey) -> Result<(), StoreError> {
        let path = self.chunk_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        // Best effort: drop the per-file directory once it empties out.
        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir(dir).await;
        }
        Ok(())
    }
}
