use std::sync::Arc;
use std::time::Duration;

use krill_net::{Connector, Request, Response};
use krill_ring::in_half_open;
use krill_store::{ChunkStore, Fetched};
use krill_types::{ChunkKey, NodeRef};
use tracing::{debug, info, warn};

use crate::error::PeerError;

/// Ownership handoff: when a new predecessor is adopted, every replica
/// whose placement id now falls on the predecessor's side of the ring
/// is pushed to it.
///
/// At most one handoff runs at a time; adoptions arriving while one is
/// in flight are covered by the next stabilization round, which
/// re-notifies and re-triggers.
pub struct Handoff {
    local: NodeRef,
    key_space: krill_ring::KeySpace,
    store: Arc<ChunkStore>,
    connector: Arc<dyn Connector>,
    cooldown: Duration,
}

impl Handoff {
    pub fn new(
        local: NodeRef,
        key_space: krill_ring::KeySpace,
        store: Arc<ChunkStore>,
        connector: Arc<dyn Connector>,
        cooldown: Duration,
    ) -> Self {
        Self {
            local,
            key_space,
            store,
            connector,
            cooldown,
        }
    }

    /// Run a handoff towards `predecessor`, if none is already running.
    pub async fn run(&self, predecessor: NodeRef) {
        if predecessor.id == self.local.id {
            return;
        }
        if !self.store.begin_handoff() {
            debug!(%predecessor, "handoff already in flight, skipping");
            return;
        }
        let mut moved = 0usize;
        for record in self.store.report().records {
            let id = self.key_space.placement_id(
                &record.key.file_id,
                record.key.chunk_no,
                record.key.copy_index,
            );
            // Replicas in (predecessor, local] stay ours.
            if in_half_open(id, predecessor.id, self.local.id) {
                continue;
            }
            // Shielded while in flight: a bounced delegation of this
            // key must be refused, not acked as a known duplicate.
            self.store.begin_transfer(&record.key);
            let result = self.transfer(&record.key, predecessor).await;
            self.store.end_transfer(&record.key);
            match result {
                Ok(()) => moved += 1,
                Err(e) => {
                    // Kept locally; a later handoff retries it.
                    warn!(key = %record.key, error = %e, "handoff transfer failed")
                }
            }
        }
        if moved > 0 {
            info!(%predecessor, moved, "ownership handoff complete");
        }
        self.finish();
    }

    /// Move one replica to the new owner, then forget it locally.
    async fn transfer(&self, key: &ChunkKey, new_owner: NodeRef) -> Result<(), PeerError> {
        let body = match self.store.fetch(key).await? {
            Fetched::Local(body) => body,
            // Parked replica: pull the bytes back one hop first.
            Fetched::Delegated(delegate) => {
                let raw = self
                    .connector
                    .request(delegate.addr, &Request::GetChunk { key: key.clone() }.encode())
                    .await?;
                match Response::parse(&raw)? {
                    Response::Chunk { body, .. } => body,
                    other => {
                        return Err(PeerError::Consistency(format!(
                            "delegate returned {other:?} for {key}"
                        )))
                    }
                }
            }
        };

        let put = Request::PutChunk {
            key: key.clone(),
            body,
        };
        let raw = self.connector.request(new_owner.addr, &put.encode()).await?;
        match Response::parse(&raw)? {
            Response::Success => {}
            other => {
                return Err(PeerError::Consistency(format!(
                    "new owner refused {key}: {other:?}"
                )))
            }
        }

        // For a parked replica the delegate keeps its copy: the wire
        // delete is chunk-granular and would take sibling copies the
        // delegate owns in its own right. A later explicit delete of
        // the backup sweeps it up.
        self.store.remove(key).await?;
        Ok(())
    }

    /// Release the handoff slot, after the configured cooldown.
    fn finish(&self) {
        if self.cooldown.is_zero() {
            self.store.end_handoff();
            return;
        }
        let store = self.store.clone();
        let cooldown = self.cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            store.end_handoff();
        });
    }
}
