//! Periodic ring maintenance.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::node::Ring;
use crate::RingRpc;

/// Fixed-period maintenance task: liveness checks, stabilization, finger
/// repair. One logical pass per tick; because the pass is awaited inside a
/// single task, ticks never overlap and this loop stays the only writer of
/// the ring pointers outside `join`/`notify`.
pub struct Stabilizer {
    ring: Arc<Ring>,
    rpc: Arc<dyn RingRpc>,
    period: Duration,
}

impl Stabilizer {
    /// Create a stabilizer driving `ring` every `period`.
    pub fn new(ring: Arc<Ring>, rpc: Arc<dyn RingRpc>, period: Duration) -> Self {
        Self { ring, rpc, period }
    }

    /// Run forever. Spawn this on its own task.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One maintenance pass, in the fixed order: check successor, check
    /// predecessor, stabilize, fix fingers.
    pub async fn tick(&self) {
        self.ring.check_successor(self.rpc.as_ref()).await;
        self.ring.check_predecessor(self.rpc.as_ref()).await;
        if let Err(e) = self.ring.stabilize(self.rpc.as_ref()).await {
            debug!(error = %e, "stabilize pass failed");
        }
        self.ring.fix_fingers(self.rpc.as_ref()).await;
    }
}
