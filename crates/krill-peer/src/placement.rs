use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use krill_net::{Connector, Request, Response};
use krill_ring::{Ring, RingRpc};
use krill_types::{ChunkKey, FileId, NodeRef};
use tracing::{debug, warn};

use crate::error::PeerError;

/// Drives the chunk placement protocol: resolve the owner of each
/// replica slot on the ring, then talk to it directly.
pub struct Placement {
    ring: Arc<Ring>,
    rpc: Arc<dyn RingRpc>,
    connector: Arc<dyn Connector>,
    /// Attempts per owner resolution before the replica slot is written off.
    attempts: u32,
    backoff: Duration,
}

impl Placement {
    pub fn new(
        ring: Arc<Ring>,
        rpc: Arc<dyn RingRpc>,
        connector: Arc<dyn Connector>,
        attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            ring,
            rpc,
            connector,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Resolve the current owner of one replica slot, with backoff.
    async fn resolve_owner(&self, key: &ChunkKey) -> Result<NodeRef, PeerError> {
        let id = self
            .ring
            .key_space()
            .placement_id(&key.file_id, key.chunk_no, key.copy_index);
        let mut last = None;
        for attempt in 0..self.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff * attempt).await;
            }
            match self.ring.find_successor(self.rpc.as_ref(), id).await {
                Ok(owner) => return Ok(owner),
                Err(e) => {
                    debug!(%key, %id, attempt, error = %e, "owner resolution failed");
                    last = Some(e);
                }
            }
        }
        Err(last.map(PeerError::Ring).unwrap_or_else(|| {
            PeerError::Consistency("owner resolution with zero attempts".to_string())
        }))
    }

    async fn exchange(&self, target: NodeRef, request: &Request) -> Result<Response, PeerError> {
        let raw = self.connector.request(target.addr, &request.encode()).await?;
        Ok(Response::parse(&raw)?)
    }

    /// Place every copy of one chunk. Returns how many copies were
    /// acknowledged; a short count is not fatal to the backup.
    pub async fn put(
        &self,
        file_id: &FileId,
        chunk_no: u32,
        rep_degree: u32,
        body: &Bytes,
    ) -> u32 {
        let mut stored = 0;
        for copy_index in 0..rep_degree {
            let key = ChunkKey::new(file_id.clone(), chunk_no, copy_index);
            let owner = match self.resolve_owner(&key).await {
                Ok(owner) => owner,
                Err(e) => {
                    warn!(%key, error = %e, "replica slot skipped, no owner resolved");
                    continue;
                }
            };
            let request = Request::PutChunk {
                key: key.clone(),
                body: body.clone(),
            };
            match self.exchange(owner, &request).await {
                Ok(Response::Success) => {
                    debug!(%key, %owner, "replica stored");
                    stored += 1;
                }
                Ok(Response::Error) => {
                    warn!(%key, %owner, "replica refused");
                }
                Ok(other) => {
                    warn!(%key, %owner, reply = ?other, "unexpected PUTCHUNK reply");
                }
                Err(e) => {
                    warn!(%key, %owner, error = %e, "replica store failed");
                }
            }
        }
        stored
    }

    /// Fetch one chunk, trying each copy in order. A reply whose header
    /// does not echo the requested chunk is a soft failure.
    pub async fn get(
        &self,
        file_id: &FileId,
        chunk_no: u32,
        rep_degree: u32,
    ) -> Result<Bytes, PeerError> {
        for copy_index in 0..rep_degree {
            let key = ChunkKey::new(file_id.clone(), chunk_no, copy_index);
            let owner = match self.resolve_owner(&key).await {
                Ok(owner) => owner,
                Err(e) => {
                    debug!(%key, error = %e, "copy skipped, no owner resolved");
                    continue;
                }
            };
            match self.exchange(owner, &Request::GetChunk { key: key.clone() }).await {
                Ok(Response::Chunk {
                    file_id: got_file,
                    chunk_no: got_no,
                    body,
                }) => {
                    if got_file == *file_id && got_no == chunk_no {
                        return Ok(body);
                    }
                    warn!(
                        %key, %owner, got = %got_file, got_no,
                        "reply does not match requested chunk"
                    );
                }
                Ok(Response::Error) => {
                    debug!(%key, %owner, "copy not available");
                }
                Ok(other) => {
                    warn!(%key, %owner, reply = ?other, "unexpected GETCHUNK reply");
                }
                Err(e) => {
                    debug!(%key, %owner, error = %e, "copy fetch failed");
                }
            }
        }
        Err(PeerError::ChunkUnavailable {
            file_id: file_id.clone(),
            chunk_no,
        })
    }

    /// Ask the owner of every copy to drop the chunk. Best effort;
    /// returns how many owners acknowledged.
    pub async fn delete(&self, file_id: &FileId, chunk_no: u32, rep_degree: u32) -> u32 {
        let mut acked = 0;
        for copy_index in 0..rep_degree {
            let key = ChunkKey::new(file_id.clone(), chunk_no, copy_index);
            let owner = match self.resolve_owner(&key).await {
                Ok(owner) => owner,
                Err(e) => {
                    debug!(%key, error = %e, "delete skipped, no owner resolved");
                    continue;
                }
            };
            let request = Request::Delete {
                file_id: file_id.clone(),
                chunk_no,
            };
            match self.exchange(owner, &request).await {
                Ok(Response::Success) => acked += 1,
                Ok(_) => {}
                Err(e) => debug!(%key, %owner, error = %e, "delete failed"),
            }
        }
        acked
    }

    /// Offer a replica to `target` for parking. `Ok(true)` means the
    /// target admitted it; `Ok(false)` means it refused.
    pub async fn delegate_to(
        &self,
        target: NodeRef,
        key: &ChunkKey,
        body: Bytes,
    ) -> Result<bool, PeerError> {
        let request = Request::Delegate {
            key: key.clone(),
            body,
        };
        match self.exchange(target, &request).await? {
            Response::Success => Ok(true),
            Response::Error => Ok(false),
            other => Err(PeerError::Consistency(format!(
                "unexpected DELEGATE reply: {other:?}"
            ))),
        }
    }
}
