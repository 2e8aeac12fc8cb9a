//! Join barrier for nodes with more than one predecessor.
//!
//! Every arriving branch bumps an atomic counter. Branches that arrive early
//! park on a `watch` channel; the last one to arrive releases the gate and
//! goes on to execute the node, while the parked ones wake and return.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    /// The last predecessor arrived; the gated node runs exactly once.
    Released,
    /// No remaining branch can arrive; the gated node never runs.
    Abandoned,
}

/// What an arriving branch must do next.
pub enum Arrival {
    /// This branch completed the barrier and owns the node's execution.
    Last,
    /// Not every predecessor has arrived yet; wait on the gate.
    Wait(GateWaiter),
}

pub struct GateWaiter {
    rx: watch::Receiver<GateState>,
}

impl GateWaiter {
    /// Park until the gate leaves `Pending`.
    pub async fn wait(mut self) -> GateState {
        match self.rx.wait_for(|s| *s != GateState::Pending).await {
            Ok(state) => *state,
            Err(_) => GateState::Abandoned,
        }
    }
}

pub struct JoinGate {
    required: usize,
    arrived: AtomicUsize,
    tx: watch::Sender<GateState>,
}

impl JoinGate {
    pub fn new(required: usize) -> Self {
        let (tx, _) = watch::channel(GateState::Pending);
        Self {
            required,
            arrived: AtomicUsize::new(0),
            tx,
        }
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire)
    }

    /// Register one arriving branch.
    pub fn arrive(&self) -> Arrival {
        let count = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.required {
            self.tx.send_replace(GateState::Released);
            Arrival::Last
        } else {
            // Subscribing after the increment is fine: a release that lands
            // in between is still observed through the channel's current value.
            Arrival::Wait(GateWaiter {
                rx: self.tx.subscribe(),
            })
        }
    }

    /// Give up on a pending gate. Returns false if it was already decided.
    pub fn abandon(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = GateState::Abandoned;
                true
            } else {
                false
            }
        })
    }
}

/// Count of branches still able to make progress in one run.
///
/// A run starts with one branch. Fanning out to `k` children adds `k - 1`;
/// a branch that finishes or parks at a gate gives its slot back.
#[derive(Debug)]
pub struct BranchCounter {
    live: AtomicUsize,
}

impl BranchCounter {
    pub fn new() -> Self {
        Self {
            live: AtomicUsize::new(1),
        }
    }

    pub fn fork(&self, extra: usize) {
        if extra > 0 {
            self.live.fetch_add(extra, Ordering::AcqRel);
        }
    }

    /// Retire one branch. Returns true when it was the last live one.
    pub fn retire(&self) -> bool {
        self.live.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl Default for BranchCounter {
    fn default() -> Self {
        Self::new()
    }
}
