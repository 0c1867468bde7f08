use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use krill_catalog::{chunkify, reassemble, FileCatalog, DEFAULT_CHUNK_SIZE};
use krill_net::{Connector, SecureChannel, TcpChannel};
use krill_ring::{Ring, RingRpc, Stabilizer};
use krill_store::{ChunkBackend, ChunkStore, Fetched, Ownership, StoreError};
use krill_types::{ChunkKey, FileId, NodeRef};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::PeerError;
use crate::handoff::Handoff;
use crate::placement::Placement;
use crate::rpc::NetRingRpc;

/// Tunables for one peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Address this peer advertises; its ring id is derived from it.
    pub addr: SocketAddr,
    /// Ring id width in bits.
    pub bits: u32,
    /// Routing hop bound.
    pub max_hops: u32,
    /// Storage capacity in bytes, `None` for unlimited.
    pub capacity: Option<u64>,
    /// Backup chunk size.
    pub chunk_size: usize,
    /// Largest file accepted for backup.
    pub max_file_size: u64,
    /// Owner-resolution attempts per replica slot.
    pub placement_attempts: u32,
    /// Base backoff between resolution attempts.
    pub placement_backoff: Duration,
    /// Ring maintenance period.
    pub stabilize_period: Duration,
    /// Concurrent inbound connection workers.
    pub workers: usize,
    /// Quiet period after a completed handoff.
    pub handoff_cooldown: Duration,
    /// Where restored files are staged.
    pub restored_dir: PathBuf,
}

impl PeerConfig {
    /// Defaults for `addr`; fields are public for overriding.
    pub fn for_addr(addr: SocketAddr) -> Self {
        Self {
            addr,
            bits: 32,
            max_hops: 32,
            capacity: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: 1024 * 1024 * 1024,
            placement_attempts: 3,
            placement_backoff: Duration::from_millis(250),
            stabilize_period: Duration::from_secs(1),
            workers: 32,
            handoff_cooldown: Duration::from_secs(2),
            restored_dir: PathBuf::from("restored"),
        }
    }
}

/// Result of a backup request.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub file_id: FileId,
    pub chunks: usize,
    pub copies_stored: u32,
    pub copies_requested: u32,
}

/// One peer in the backup network. Owns its ring state, chunk store and
/// backup catalog; all collaborators are held here, no global state.
pub struct PeerNode {
    config: PeerConfig,
    ring: Arc<Ring>,
    store: Arc<ChunkStore>,
    catalog: FileCatalog,
    placement: Arc<Placement>,
    dispatcher: Arc<Dispatcher>,
    rpc: Arc<dyn RingRpc>,
}

impl PeerNode {
    /// Wire a peer up. The transport and byte backend are injected so
    /// tests can run whole networks in-process.
    pub fn new(
        config: PeerConfig,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn ChunkBackend>,
    ) -> Self {
        let key_space = krill_ring::KeySpace::new(config.bits);
        let ring = Arc::new(Ring::new(key_space, config.addr, config.max_hops));
        let store = Arc::new(ChunkStore::new(backend, config.capacity));
        let rpc: Arc<dyn RingRpc> = Arc::new(NetRingRpc::new(key_space, connector.clone()));
        let placement = Arc::new(Placement::new(
            ring.clone(),
            rpc.clone(),
            connector.clone(),
            config.placement_attempts,
            config.placement_backoff,
        ));
        let handoff = Arc::new(Handoff::new(
            ring.local(),
            key_space,
            store.clone(),
            connector.clone(),
            config.handoff_cooldown,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            ring.clone(),
            store.clone(),
            placement.clone(),
            connector,
            handoff,
        ));
        let catalog = FileCatalog::new(config.max_file_size);
        Self {
            config,
            ring,
            store,
            catalog,
            placement,
            dispatcher,
            rpc,
        }
    }

    pub fn local(&self) -> NodeRef {
        self.ring.local()
    }

    pub fn ring(&self) -> &Arc<Ring> {
        &self.ring
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Start a fresh ring with this peer as its only member.
    pub fn create(&self) {
        info!(local = %self.local(), "created new ring");
    }

    /// Join the ring through a known member.
    pub async fn join(&self, bootstrap: SocketAddr) -> Result<(), PeerError> {
        let bootstrap = self.ring.key_space().node_ref(bootstrap);
        self.ring.join(self.rpc.as_ref(), bootstrap).await?;
        info!(local = %self.local(), %bootstrap, "joined ring");
        Ok(())
    }

    /// Spawn the periodic ring maintenance task.
    pub fn spawn_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let stabilizer = Stabilizer::new(
            self.ring.clone(),
            self.rpc.clone(),
            self.config.stabilize_period,
        );
        tokio::spawn(stabilizer.run())
    }

    /// One maintenance pass, on demand.
    pub async fn stabilize_tick(&self) {
        Stabilizer::new(
            self.ring.clone(),
            self.rpc.clone(),
            self.config.stabilize_period,
        )
        .tick()
        .await;
    }

    /// Accept loop: one worker per connection, bounded by the
    /// configured worker count.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, secret: String) -> Result<(), PeerError> {
        let workers = Arc::new(Semaphore::new(self.config.workers));
        info!(local = %self.local(), workers = self.config.workers, "serving");
        loop {
            let (stream, remote) = listener.accept().await?;
            let Ok(permit) = workers.clone().acquire_owned().await else {
                // Only possible if the semaphore is closed, which it never is.
                continue;
            };
            let node = self.clone();
            let secret = secret.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let mut channel = match TcpChannel::accept(stream, &secret).await {
                    Ok(channel) => channel,
                    Err(e) => {
                        debug!(%remote, error = %e, "handshake failed");
                        return;
                    }
                };
                let raw = match channel.receive().await {
                    Ok(raw) => raw,
                    Err(e) => {
                        debug!(%remote, error = %e, "receive failed");
                        return;
                    }
                };
                if let Some(reply) = node.dispatcher.handle_raw(&raw).await {
                    if let Err(e) = channel.send(&reply).await {
                        debug!(%remote, error = %e, "reply failed");
                    }
                }
            });
        }
    }

    /// Back a file up with the requested replication degree.
    ///
    /// A short copy count is reported, not fatal: the chunks that did
    /// land stay placed.
    pub async fn backup(&self, path: &str, rep_degree: u32) -> Result<BackupOutcome, PeerError> {
        let meta = tokio::fs::metadata(path).await?;
        self.catalog.check_file_size(meta.len())?;
        let modified = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let content = tokio::fs::read(path).await?;
        let file_id = FileId::for_file(path, modified, &content);

        let chunks = chunkify(&content, self.config.chunk_size);
        let sizes: Vec<u64> = chunks.iter().map(|c| c.len() as u64).collect();
        self.catalog
            .register(file_id.clone(), path.to_string(), rep_degree, &sizes);

        let mut copies_stored = 0;
        for (i, body) in chunks.iter().enumerate() {
            let chunk_no = i as u32 + 1;
            let stored = self
                .placement
                .put(&file_id, chunk_no, rep_degree, body)
                .await;
            for _ in 0..stored {
                self.catalog.note_stored(&file_id, chunk_no);
            }
            // Copies the ring placed on this very node learn their
            // degrees, so a later reclaim evicts over-replicated
            // chunks first.
            for copy in 0..rep_degree {
                let key = ChunkKey::new(file_id.clone(), chunk_no, copy);
                if self.store.contains(&key) {
                    self.store.note_replication(&key, rep_degree, stored);
                }
            }
            copies_stored += stored;
        }
        let outcome = BackupOutcome {
            file_id,
            chunks: chunks.len(),
            copies_stored,
            copies_requested: rep_degree * chunks.len() as u32,
        };
        info!(
            path,
            file_id = %outcome.file_id,
            stored = outcome.copies_stored,
            requested = outcome.copies_requested,
            "backup finished"
        );
        Ok(outcome)
    }

    /// Restore a backed-up file into the staging directory.
    ///
    /// Fails whole if any chunk cannot be fetched from any replica; the
    /// staged file is only written once every chunk is in hand.
    pub async fn restore(&self, path: &str) -> Result<PathBuf, PeerError> {
        let record = self.catalog.by_path(path)?;
        let mut parts = Vec::with_capacity(record.chunks.len());
        for chunk in &record.chunks {
            let body = self
                .placement
                .get(&record.file_id, chunk.chunk_no, record.desired)
                .await?;
            parts.push((chunk.chunk_no, body));
        }
        let content = reassemble(parts)?;

        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("restored.bin");
        tokio::fs::create_dir_all(&self.config.restored_dir).await?;
        let dest = self.config.restored_dir.join(name);
        tokio::fs::write(&dest, &content).await?;
        info!(path, dest = %dest.display(), bytes = content.len(), "restore finished");
        Ok(dest)
    }

    /// Remove a backup from the network, best effort, then forget it.
    pub async fn delete(&self, path: &str) -> Result<u32, PeerError> {
        let record = self.catalog.by_path(path)?;
        let mut acked = 0;
        for chunk in &record.chunks {
            acked += self
                .placement
                .delete(&record.file_id, chunk.chunk_no, record.desired)
                .await;
        }
        self.catalog.remove(&record.file_id);
        info!(path, file_id = %record.file_id, acked, "delete finished");
        Ok(acked)
    }

    /// Change the storage limit, evicting by delegation if usage is
    /// over the new limit. The new limit only takes effect once usage
    /// fits under it; a failed reclaim leaves the old limit in force.
    ///
    /// A target of zero is the explicit clear-out: replicas that cannot
    /// be parked anywhere are dropped with a warning. Any other target
    /// never drops data; if delegation cannot get usage under the
    /// limit, the reclaim fails with everything intact.
    pub async fn reclaim(&self, new_max: Option<u64>) -> Result<(), PeerError> {
        let Some(target) = new_max else {
            self.store.set_capacity(None);
            info!("storage limit lifted");
            return Ok(());
        };
        if self.store.used() > target {
            let successor = self.ring.successor();
            let can_delegate = successor.id != self.local().id;

            for record in self.store.eviction_candidates() {
                if self.store.used() <= target {
                    break;
                }
                let body = match self.store.fetch(&record.key).await? {
                    Fetched::Local(body) => body,
                    Fetched::Delegated(_) => continue,
                };
                let parked = if can_delegate {
                    self.placement
                        .delegate_to(successor, &record.key, body)
                        .await
                        .unwrap_or(false)
                } else {
                    false
                };
                if parked {
                    self.store.remove(&record.key).await?;
                    self.store.record_delegated(record.key.clone(), successor);
                    debug!(key = %record.key, %successor, "replica parked during reclaim");
                } else if target == 0 {
                    self.store.remove(&record.key).await?;
                    warn!(key = %record.key, "replica dropped during clear-out");
                } else {
                    return Err(StoreError::ReclaimBlocked {
                        target,
                        used: self.store.used(),
                    }
                    .into());
                }
            }
            if self.store.used() > target {
                return Err(StoreError::ReclaimBlocked {
                    target,
                    used: self.store.used(),
                }
                .into());
            }
        }
        self.store.set_capacity(Some(target));
        info!(target, used = self.store.used(), "reclaim finished");
        Ok(())
    }

    /// Human-readable status: ring position, storage and backups.
    pub fn state_report(&self) -> String {
        let snapshot = self.ring.snapshot();
        let report = self.store.report();
        let mut out = String::new();

        let _ = writeln!(out, "node {}", snapshot.local);
        let _ = writeln!(out, "  successor   {}", snapshot.successor);
        match snapshot.predecessor {
            Some(pred) => {
                let _ = writeln!(out, "  predecessor {pred}");
            }
            None => {
                let _ = writeln!(out, "  predecessor none");
            }
        }
        match report.capacity {
            Some(cap) => {
                let _ = writeln!(out, "storage {} / {} bytes", report.used, cap);
            }
            None => {
                let _ = writeln!(out, "storage {} bytes (unlimited)", report.used);
            }
        }

        let _ = writeln!(out, "backups:");
        for file in self.catalog.records() {
            let _ = writeln!(
                out,
                "  {} {} (desired {})",
                file.file_id, file.path, file.desired
            );
            for chunk in &file.chunks {
                let _ = writeln!(
                    out,
                    "    chunk {} size {} observed {}",
                    chunk.chunk_no, chunk.size, chunk.observed
                );
            }
        }

        let _ = writeln!(out, "chunks held:");
        let mut records = report.records;
        records.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        for record in records {
            match record.ownership {
                Ownership::Local => {
                    let _ = writeln!(out, "  {} local {} bytes", record.key, record.size);
                }
                Ownership::Delegated(delegate) => {
                    let _ = writeln!(out, "  {} delegated to {}", record.key, delegate);
                }
            }
        }
        out
    }
}
