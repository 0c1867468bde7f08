use std::sync::Arc;

use krill_net::{Connector, Request, Response};
use krill_ring::Ring;
use krill_store::{ChunkStore, Fetched, Ownership, StoreError};
use krill_types::{ChunkKey, FileId};
use tracing::{debug, warn};

use crate::handoff::Handoff;
use crate::placement::Placement;

/// Handles every inbound request against this node.
///
/// One instance serves all connections; each call is independent of the
/// transport, so tests drive it through an in-process connector and the
/// daemon drives it from accepted sockets. A malformed message gets an
/// `ERROR` reply and never takes the node down.
pub struct Dispatcher {
    ring: Arc<Ring>,
    store: Arc<ChunkStore>,
    placement: Arc<Placement>,
    connector: Arc<dyn Connector>,
    handoff: Arc<Handoff>,
}

impl Dispatcher {
    pub fn new(
        ring: Arc<Ring>,
        store: Arc<ChunkStore>,
        placement: Arc<Placement>,
        connector: Arc<dyn Connector>,
        handoff: Arc<Handoff>,
    ) -> Self {
        Self {
            ring,
            store,
            placement,
            connector,
            handoff,
        }
    }

    /// Handle one raw inbound message. `None` means no reply is owed
    /// (NOTIFY); the connection is closed either way.
    pub async fn handle_raw(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let request = match Request::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed inbound message");
                return Some(Response::Error.encode());
            }
        };
        self.handle(request).await.map(|r| r.encode())
    }

    /// Handle one parsed request.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        debug!(verb = request.verb(), "inbound request");
        match request {
            Request::FindSuccessor { id } => Some(Response::Node {
                addr: self.ring.route_step(id).addr,
            }),
            Request::GetPredecessor => Some(match self.ring.predecessor() {
                Some(pred) => Response::Node { addr: pred.addr },
                None => Response::NoPredecessor,
            }),
            Request::Notify { addr } => {
                let candidate = self.ring.key_space().node_ref(addr);
                if let Some(adopted) = self.ring.notify(candidate) {
                    self.handoff.run(adopted).await;
                }
                None
            }
            Request::PutChunk { key, body } => Some(self.put_chunk(key, body).await),
            Request::Delegate { key, body } => Some(self.accept_delegate(key, body).await),
            Request::GetChunk { key } => Some(self.get_chunk(key).await),
            Request::Delete { file_id, chunk_no } => Some(self.delete(file_id, chunk_no).await),
        }
    }

    /// Admit a replica as its ring owner; on capacity refusal, try to
    /// park it one hop away on the successor.
    async fn put_chunk(&self, key: ChunkKey, body: bytes::Bytes) -> Response {
        match self.store.store_local(key.clone(), body.clone()).await {
            Ok(_) => Response::Success,
            Err(StoreError::CapacityExceeded { .. }) => self.park(key, body).await,
            Err(StoreError::HandoffInFlight(_)) => {
                debug!(%key, "admission refused mid-handoff");
                Response::Error
            }
            Err(e) => {
                warn!(%key, error = %e, "chunk admission failed");
                Response::Error
            }
        }
    }

    async fn park(&self, key: ChunkKey, body: bytes::Bytes) -> Response {
        let successor = self.ring.successor();
        if successor.id == self.ring.local().id {
            debug!(%key, "no room and no successor to delegate to");
            return Response::Error;
        }
        match self.placement.delegate_to(successor, &key, body).await {
            Ok(true) => {
                self.store.record_delegated(key, successor);
                Response::Success
            }
            Ok(false) => {
                debug!(%key, %successor, "delegate refused");
                Response::Error
            }
            Err(e) => {
                warn!(%key, %successor, error = %e, "delegation failed");
                Response::Error
            }
        }
    }

    /// Admit a replica on behalf of a full owner. Strictly one hop: a
    /// delegate that cannot admit refuses, it never re-delegates.
    async fn accept_delegate(&self, key: ChunkKey, body: bytes::Bytes) -> Response {
        match self.store.store_local(key.clone(), body).await {
            Ok(_) => Response::Success,
            Err(StoreError::CapacityExceeded { .. }) => Response::Error,
            Err(StoreError::HandoffInFlight(_)) => {
                debug!(%key, "delegation refused mid-handoff");
                Response::Error
            }
            Err(e) => {
                warn!(%key, error = %e, "delegated chunk admission failed");
                Response::Error
            }
        }
    }

    /// Serve a replica, relaying through the delegate when the bytes
    /// were parked elsewhere.
    async fn get_chunk(&self, key: ChunkKey) -> Response {
        match self.store.fetch(&key).await {
            Ok(Fetched::Local(body)) => Response::Chunk {
                file_id: key.file_id,
                chunk_no: key.chunk_no,
                body,
            },
            Ok(Fetched::Delegated(delegate)) => {
                let forward = Request::GetChunk { key: key.clone() };
                match self.connector.request(delegate.addr, &forward.encode()).await {
                    Ok(raw) => match Response::parse(&raw) {
                        Ok(reply @ Response::Chunk { .. }) => reply,
                        Ok(_) | Err(_) => Response::Error,
                    },
                    Err(e) => {
                        warn!(%key, %delegate, error = %e, "delegate fetch failed");
                        Response::Error
                    }
                }
            }
            Err(StoreError::NotFound(_)) => Response::Error,
            Err(e) => {
                warn!(%key, error = %e, "chunk fetch failed");
                Response::Error
            }
        }
    }

    /// Drop every copy of a chunk held here, chasing parked copies one
    /// hop. `SUCCESS` only if something was actually removed.
    async fn delete(&self, file_id: FileId, chunk_no: u32) -> Response {
        let removed = match self.store.remove_chunk(&file_id, chunk_no).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(%file_id, chunk_no, error = %e, "chunk delete failed");
                return Response::Error;
            }
        };
        for (key, ownership) in &removed {
            if let Ownership::Delegated(delegate) = ownership {
                let forward = Request::Delete {
                    file_id: file_id.clone(),
                    chunk_no,
                };
                if let Err(e) = self.connector.request(delegate.addr, &forward.encode()).await {
                    debug!(%key, %delegate, error = %e, "delegate delete failed");
                }
            }
        }
        if removed.is_empty() {
            Response::Error
        } else {
            Response::Success
        }
    }
}
