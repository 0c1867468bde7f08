//! This node's ring state and the Chord routing algorithms.
//!
//! [`Ring`] owns the successor/predecessor pointers and the finger table
//! behind a mutex; remote traffic goes through the [`RingRpc`] trait. The
//! lock is never held across an await — methods snapshot the pointers they
//! need, perform remote calls, then write back.

use std::net::SocketAddr;
use std::sync::Mutex;

use krill_types::{NodeRef, RingId};
use tracing::{debug, info, warn};

use crate::error::RingError;
use crate::keyspace::{in_half_open, in_open, KeySpace};
use crate::RingRpc;

/// Mutable ring pointers. Invariant: `fingers[0] == successor`.
struct RingState {
    successor: NodeRef,
    predecessor: Option<NodeRef>,
    fingers: Vec<NodeRef>,
}

/// Read-only view of the ring pointers, for state reports and tests.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    /// This node.
    pub local: NodeRef,
    /// Current successor (self when the ring is degenerate).
    pub successor: NodeRef,
    /// Current predecessor, if known.
    pub predecessor: Option<NodeRef>,
}

/// This node's position in the ring overlay plus the routing algorithms.
pub struct Ring {
    key_space: KeySpace,
    local: NodeRef,
    state: Mutex<RingState>,
    max_hops: u32,
}

impl Ring {
    /// Create a ring handle for the node at `addr`, initially a singleton
    /// ring: no predecessor, successor = self, all fingers = self.
    pub fn new(key_space: KeySpace, addr: SocketAddr, max_hops: u32) -> Self {
        let local = key_space.node_ref(addr);
        Self::with_local(key_space, local, max_hops)
    }

    /// Create a ring handle with an explicit local reference.
    ///
    /// Used by tests that need nodes at chosen ring positions.
    pub fn with_local(key_space: KeySpace, local: NodeRef, max_hops: u32) -> Self {
        let state = RingState {
            successor: local,
            predecessor: None,
            fingers: vec![local; key_space.bits() as usize],
        };
        Self {
            key_space,
            local,
            state: Mutex::new(state),
            max_hops,
        }
    }

    /// The key space this ring operates in.
    pub fn key_space(&self) -> &KeySpace {
        &self.key_space
    }

    /// Reference to this node.
    pub fn local(&self) -> NodeRef {
        self.local
    }

    /// Current successor.
    pub fn successor(&self) -> NodeRef {
        self.state.lock().expect("lock poisoned").successor
    }

    /// Current predecessor, if any.
    pub fn predecessor(&self) -> Option<NodeRef> {
        self.state.lock().expect("lock poisoned").predecessor
    }

    /// Current finger table contents.
    #[cfg(test)]
    pub(crate) fn fingers(&self) -> Vec<NodeRef> {
        self.state.lock().expect("lock poisoned").fingers.clone()
    }

    /// Snapshot of the current pointers.
    pub fn snapshot(&self) -> RingSnapshot {
        let state = self.state.lock().expect("lock poisoned");
        RingSnapshot {
            local: self.local,
            successor: state.successor,
            predecessor: state.predecessor,
        }
    }

    /// Join the ring known to `bootstrap`: resolve our successor through
    /// it and seed the finger table from that single answer.
    pub async fn join(&self, rpc: &dyn RingRpc, bootstrap: NodeRef) -> Result<(), RingError> {
        let successor = self
            .remote_resolve(rpc, bootstrap, self.local.id)
            .await?;

        let mut state = self.state.lock().expect("lock poisoned");
        state.predecessor = None;
        state.successor = successor;
        state.fingers[0] = successor;
        for i in 1..self.key_space.bits() {
            let ideal = self.key_space.finger_id(self.local.id, i);
            state.fingers[i as usize] = if in_half_open(ideal, self.local.id, successor.id) {
                successor
            } else {
                self.local
            };
        }
        info!(local = %self.local, %successor, "joined ring");
        Ok(())
    }

    /// One local routing step for `id`, with no remote calls.
    ///
    /// Returns the successor when `id` falls in `(self, successor]`, the
    /// closest preceding finger otherwise. This is what the dispatcher
    /// answers to a remote `FINDSUCCESSOR`.
    pub fn route_step(&self, id: RingId) -> NodeRef {
        let state = self.state.lock().expect("lock poisoned");
        if in_half_open(id, self.local.id, state.successor.id) {
            return state.successor;
        }
        Self::closest_preceding(&state, self.local, id)
    }

    /// Scan the finger table top-down for the closest node strictly
    /// preceding `id`; fall back to the successor (linear step).
    fn closest_preceding(state: &RingState, local: NodeRef, id: RingId) -> NodeRef {
        for finger in state.fingers.iter().skip(1).rev() {
            if in_open(finger.id, local.id, id) {
                return *finger;
            }
        }
        state.successor
    }

    /// Resolve the node owning `id`.
    ///
    /// Iterative with a hop bound: each hop asks the current candidate for
    /// one routing step. The answer is final when `id` lands in
    /// `(queried, answer]` — the same interval test the queried node used.
    /// A remote failure or an exhausted hop budget is a routing failure;
    /// retries belong to the placement layer.
    pub async fn find_successor(&self, rpc: &dyn RingRpc, id: RingId) -> Result<NodeRef, RingError> {
        let first = {
            let state = self.state.lock().expect("lock poisoned");
            if in_half_open(id, self.local.id, state.successor.id) {
                return Ok(state.successor);
            }
            Self::closest_preceding(&state, self.local, id)
        };
        if first.id == self.local.id {
            // Fingers know nothing better than ourselves: chain terminates.
            return Ok(self.local);
        }
        self.remote_resolve(rpc, first, id).await
    }

    /// Drive the iterative resolution loop starting from `current`.
    async fn remote_resolve(
        &self,
        rpc: &dyn RingRpc,
        mut current: NodeRef,
        id: RingId,
    ) -> Result<NodeRef, RingError> {
        for _ in 0..self.max_hops {
            if current.id == self.local.id {
                return Ok(self.local);
            }
            let answer = match rpc.find_successor(current, id).await {
                Ok(answer) => answer,
                Err(e) => {
                    // Presumed dead: steer the next attempt around it.
                    self.evict_finger(current);
                    return Err(e);
                }
            };
            if in_half_open(id, current.id, answer.id) {
                return Ok(answer);
            }
            if answer.id == current.id {
                // The remote could do no better than itself.
                return Ok(answer);
            }
            current = answer;
        }
        Err(RingError::RoutingExhausted {
            id,
            hops: self.max_hops,
        })
    }

    /// Replace finger entries pointing at an unreachable node with self,
    /// so `closest_preceding` stops routing through it. The successor
    /// slot is left to `check_successor`.
    fn evict_finger(&self, dead: NodeRef) {
        let mut state = self.state.lock().expect("lock poisoned");
        for finger in state.fingers.iter_mut().skip(1) {
            if finger.id == dead.id {
                *finger = self.local;
            }
        }
    }

    /// Stabilize: ask the successor for its predecessor `x`, adopt `x` as
    /// successor when it sits strictly between us and the old successor,
    /// then notify the (possibly updated) successor of ourselves.
    ///
    /// When we are our own successor the questions are answered locally and
    /// the notify is applied through [`Ring::notify`] directly.
    pub async fn stabilize(&self, rpc: &dyn RingRpc) -> Result<(), RingError> {
        let successor = self.successor();

        let x = if successor.id == self.local.id {
            self.predecessor()
        } else {
            rpc.get_predecessor(successor).await?
        };

        let successor = {
            let mut state = self.state.lock().expect("lock poisoned");
            if let Some(x) = x {
                if in_open(x.id, self.local.id, state.successor.id) {
                    debug!(adopted = %x, "stabilize adopted new successor");
                    state.successor = x;
                    state.fingers[0] = x;
                }
            }
            state.successor
        };

        if successor.id == self.local.id {
            self.notify(self.local);
            Ok(())
        } else {
            rpc.notify(successor, self.local).await
        }
    }

    /// Handle a notify from `candidate`: adopt it as predecessor when we
    /// have none or it sits strictly between the current predecessor and
    /// us. Returns the adopted node so the caller can trigger the chunk
    /// ownership handoff — exactly once per adoption.
    pub fn notify(&self, candidate: NodeRef) -> Option<NodeRef> {
        let mut state = self.state.lock().expect("lock poisoned");
        let adopt = match state.predecessor {
            None => true,
            Some(p) => in_open(candidate.id, p.id, self.local.id),
        };
        if adopt {
            debug!(%candidate, "adopted new predecessor");
            state.predecessor = Some(candidate);
            Some(candidate)
        } else {
            None
        }
    }

    /// Recompute every finger table entry above the successor slot.
    ///
    /// Individual resolution failures leave the stale entry in place; the
    /// next pass repairs it.
    pub async fn fix_fingers(&self, rpc: &dyn RingRpc) {
        for i in (1..self.key_space.bits()).rev() {
            let ideal = self.key_space.finger_id(self.local.id, i);
            match self.find_successor(rpc, ideal).await {
                Ok(node) => {
                    let mut state = self.state.lock().expect("lock poisoned");
                    state.fingers[i as usize] = node;
                }
                Err(e) => {
                    debug!(finger = i, error = %e, "finger repair failed");
                }
            }
        }
    }

    /// Probe the successor; on failure shrink the ring gracefully by
    /// pointing at ourselves until stabilization elsewhere heals it.
    pub async fn check_successor(&self, rpc: &dyn RingRpc) {
        let successor = self.successor();
        if successor.id == self.local.id {
            return;
        }
        if !rpc.probe(successor).await {
            warn!(%successor, "successor failed, resetting to self");
            let mut state = self.state.lock().expect("lock poisoned");
            state.successor = self.local;
            state.fingers[0] = self.local;
        }
    }

    /// Probe the predecessor; on failure forget it so the next notify can
    /// fill the slot.
    pub async fn check_predecessor(&self, rpc: &dyn RingRpc) {
        let Some(predecessor) = self.predecessor() else {
            return;
        };
        if predecessor.id == self.local.id {
            return;
        }
        if !rpc.probe(predecessor).await {
            warn!(%predecessor, "predecessor failed, clearing");
            let mut state = self.state.lock().expect("lock poisoned");
            state.predecessor = None;
        }
    }
}
