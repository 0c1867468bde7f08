use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use krill_types::{ChunkKey, FileId, NodeRef};
use tracing::debug;

use crate::backend::ChunkBackend;
use crate::error::StoreError;

/// Where a replica this node answers for actually lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// The bytes are in this node's backend.
    Local,
    /// The bytes were parked on another node; this node forwards for them.
    Delegated(NodeRef),
}

/// Bookkeeping for one replica.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub key: ChunkKey,
    pub size: u64,
    pub ownership: Ownership,
    /// Copies the backup requested for this chunk.
    pub desired: u32,
    /// Copies this node believes exist.
    pub observed: u32,
}

/// Result of looking a replica up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Local(Bytes),
    Delegated(NodeRef),
}

/// Point-in-time view of the store, for status reporting.
#[derive(Debug, Clone)]
pub struct StoreReport {
    pub capacity: Option<u64>,
    pub used: u64,
    pub records: Vec<ChunkRecord>,
}

#[derive(Default)]
struct State {
    records: HashMap<ChunkKey, ChunkRecord>,
    /// Keys whose backend write is still running. They already count
    /// against capacity so concurrent admits cannot oversubscribe.
    in_flight: HashSet<ChunkKey>,
    /// Keys whose ownership transfer to a new node is in flight.
    /// Admissions for them are refused until the transfer settles.
    handing_off: HashSet<ChunkKey>,
    used: u64,
    capacity: Option<u64>,
}

/// The node's chunk store: capacity accounting, delegation bookkeeping
/// and a pluggable byte backend.
pub struct ChunkStore {
    backend: Arc<dyn ChunkBackend>,
    state: Mutex<State>,
    handoff_active: AtomicBool,
}

impl ChunkStore {
    /// `capacity` of `None` means unlimited.
    pub fn new(backend: Arc<dyn ChunkBackend>, capacity: Option<u64>) -> Self {
        Self {
            backend,
            state: Mutex::new(State {
                capacity,
                ..State::default()
            }),
            handoff_active: AtomicBool::new(false),
        }
    }

    /// Admit and persist a replica. Returns `false` when the key is
    /// already known, which callers treat as success.
    ///
    /// A key mid-handoff is refused outright: treating it as a known
    /// duplicate would let a full new owner delegate the chunk straight
    /// back here and get an ack for bytes about to be deleted.
    pub async fn store_local(&self, key: ChunkKey, body: Bytes) -> Result<bool, StoreError> {
        let size = body.len() as u64;
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.handing_off.contains(&key) {
                return Err(StoreError::HandoffInFlight(key));
            }
            if state.records.contains_key(&key) || state.in_flight.contains(&key) {
                return Ok(false);
            }
            if let Some(cap) = state.capacity {
                let available = cap.saturating_sub(state.used);
                if size > available {
                    return Err(StoreError::CapacityExceeded {
                        needed: size,
                        available,
                    });
                }
            }
            state.used += size;
            state.in_flight.insert(key.clone());
        }

        match self.backend.write(&key, &body).await {
            Ok(()) => {
                let mut state = self.state.lock().expect("lock poisoned");
                state.in_flight.remove(&key);
                state.records.insert(
                    key.clone(),
                    ChunkRecord {
                        key: key.clone(),
                        size,
                        ownership: Ownership::Local,
                        desired: 0,
                        observed: 0,
                    },
                );
                debug!(%key, size, "chunk stored");
                Ok(true)
            }
            Err(e) => {
                let mut state = self.state.lock().expect("lock poisoned");
                state.in_flight.remove(&key);
                state.used -= size;
                Err(e)
            }
        }
    }

    /// Record that a replica this node answers for was parked on
    /// `delegate`. Consumes no local capacity.
    pub fn record_delegated(&self, key: ChunkKey, delegate: NodeRef) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.records.entry(key.clone()).or_insert_with(|| {
            debug!(%key, %delegate, "chunk delegated");
            ChunkRecord {
                key,
                size: 0,
                ownership: Ownership::Delegated(delegate),
                desired: 0,
                observed: 0,
            }
        });
    }

    /// Look a replica up, yielding bytes or the delegate holding them.
    pub async fn fetch(&self, key: &ChunkKey) -> Result<Fetched, StoreError> {
        let ownership = {
            let state = self.state.lock().expect("lock poisoned");
            state
                .records
                .get(key)
                .map(|r| r.ownership.clone())
                .ok_or_else(|| StoreError::NotFound(key.clone()))?
        };
        match ownership {
            Ownership::Local => Ok(Fetched::Local(self.backend.read(key).await?)),
            Ownership::Delegated(delegate) => Ok(Fetched::Delegated(delegate)),
        }
    }

    /// Drop one replica. Returns its ownership, or `None` if unknown.
    pub async fn remove(&self, key: &ChunkKey) -> Result<Option<Ownership>, StoreError> {
        let removed = {
            let mut state = self.state.lock().expect("lock poisoned");
            match state.records.remove(key) {
                Some(record) => {
                    state.used -= record.size;
                    Some(record.ownership)
                }
                None => None,
            }
        };
        if matches!(removed, Some(Ownership::Local)) {
            self.backend.remove(key).await?;
        }
        Ok(removed)
    }

    /// Drop every copy of a chunk. Returns what was removed so callers
    /// can chase delegated copies.
    pub async fn remove_chunk(
        &self,
        file_id: &FileId,
        chunk_no: u32,
    ) -> Result<Vec<(ChunkKey, Ownership)>, StoreError> {
        let keys: Vec<ChunkKey> = {
            let state = self.state.lock().expect("lock poisoned");
            state
                .records
                .keys()
                .filter(|k| k.is_chunk(file_id, chunk_no))
                .cloned()
                .collect()
        };
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(ownership) = self.remove(&key).await? {
                removed.push((key, ownership));
            }
        }
        Ok(removed)
    }

    /// Whether the key is known, locally or by delegation.
    pub fn contains(&self, key: &ChunkKey) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state.records.contains_key(key) || state.in_flight.contains(key)
    }

    /// Update the replication counts tracked for a replica.
    pub fn note_replication(&self, key: &ChunkKey, desired: u32, observed: u32) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(record) = state.records.get_mut(key) {
            record.desired = desired;
            record.observed = observed;
        }
    }

    /// Change the capacity limit. Takes effect for future admissions;
    /// shrinking below current usage is resolved by a reclaim.
    pub fn set_capacity(&self, capacity: Option<u64>) {
        self.state.lock().expect("lock poisoned").capacity = capacity;
    }

    pub fn used(&self) -> u64 {
        self.state.lock().expect("lock poisoned").used
    }

    pub fn capacity(&self) -> Option<u64> {
        self.state.lock().expect("lock poisoned").capacity
    }

    /// Locally held records, best eviction candidates first: largest
    /// replication surplus, then largest size.
    pub fn eviction_candidates(&self) -> Vec<ChunkRecord> {
        let state = self.state.lock().expect("lock poisoned");
        let mut locals: Vec<ChunkRecord> = state
            .records
            .values()
            .filter(|r| r.ownership == Ownership::Local)
            .cloned()
            .collect();
        locals.sort_by_key(|r| {
            let surplus = i64::from(r.observed) - i64::from(r.desired);
            (std::cmp::Reverse(surplus), std::cmp::Reverse(r.size))
        });
        locals
    }

    /// Locally held records, in no particular order.
    pub fn local_records(&self) -> Vec<ChunkRecord> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .records
            .values()
            .filter(|r| r.ownership == Ownership::Local)
            .cloned()
            .collect()
    }

    pub fn report(&self) -> StoreReport {
        let state = self.state.lock().expect("lock poisoned");
        StoreReport {
            capacity: state.capacity,
            used: state.used,
            records: state.records.values().cloned().collect(),
        }
    }

    /// Claim the single handoff slot. At most one ownership handoff
    /// runs at a time; a second adoption while one is in flight is
    /// picked up by the next one.
    pub fn begin_handoff(&self) -> bool {
        self.handoff_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_handoff(&self) {
        self.handoff_active.store(false, Ordering::Release);
    }

    /// Shield one replica whose ownership transfer is in flight.
    pub fn begin_transfer(&self, key: &ChunkKey) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.handing_off.insert(key.clone());
    }

    pub fn end_transfer(&self, key: &ChunkKey) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.handing_off.remove(key);
    }
}
