//! Shared test utilities for krill-peer tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use krill_net::{Connector, NetError};
use krill_store::MemoryBackend;

use crate::dispatcher::Dispatcher;
use crate::node::{PeerConfig, PeerNode};

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// In-process transport: requests are delivered straight to the target
/// peer's dispatcher. Unregistered addresses are unreachable.
#[derive(Default)]
pub struct TestNet {
    peers: Mutex<HashMap<SocketAddr, Arc<Dispatcher>>>,
}

impl TestNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, addr: SocketAddr, dispatcher: Arc<Dispatcher>) {
        self.peers
            .lock()
            .expect("lock poisoned")
            .insert(addr, dispatcher);
    }

    pub fn unregister(&self, addr: SocketAddr) {
        self.peers.lock().expect("lock poisoned").remove(&addr);
    }
}

#[async_trait::async_trait]
impl Connector for TestNet {
    async fn request(&self, target: SocketAddr, payload: &[u8]) -> Result<Vec<u8>, NetError> {
        let dispatcher = self
            .peers
            .lock()
            .expect("lock poisoned")
            .get(&target)
            .cloned()
            .ok_or_else(|| NetError::Connect(format!("{target}: no such peer")))?;
        // No-reply exchanges (NOTIFY) come back as an empty message.
        Ok(dispatcher.handle_raw(payload).await.unwrap_or_default())
    }
}

/// One in-process peer plus its scratch directory.
pub struct TestPeer {
    pub node: Arc<PeerNode>,
    pub dir: tempfile::TempDir,
}

impl TestPeer {
    /// Write a source file into the scratch directory, returning its path.
    pub fn source_file(&self, name: &str, content: &[u8]) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }
}

/// Spawn a peer on `port` with test-friendly tunables.
pub async fn spawn_peer(net: &Arc<TestNet>, port: u16, capacity: Option<u64>) -> TestPeer {
    spawn_peer_with(net, port, |config| config.capacity = capacity).await
}

/// Spawn a peer on `port`, letting the caller tweak the config.
pub async fn spawn_peer_with(
    net: &Arc<TestNet>,
    port: u16,
    tweak: impl FnOnce(&mut PeerConfig),
) -> TestPeer {
    let dir = tempfile::tempdir().unwrap();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut config = PeerConfig::for_addr(addr);
    config.chunk_size = 1024;
    config.placement_attempts = 2;
    config.placement_backoff = Duration::from_millis(1);
    config.stabilize_period = Duration::from_millis(10);
    config.handoff_cooldown = Duration::ZERO;
    config.restored_dir = dir.path().join("restored");
    tweak(&mut config);

    let connector: Arc<dyn Connector> = net.clone();
    let node = Arc::new(PeerNode::new(
        config,
        connector,
        Arc::new(MemoryBackend::new()),
    ));
    net.register(node.local().addr, node.dispatcher());
    TestPeer { node, dir }
}

/// Run enough maintenance passes for the ring to converge.
pub async fn settle(peers: &[&TestPeer]) {
    for _ in 0..8 {
        for peer in peers {
            peer.node.stabilize_tick().await;
        }
    }
}
