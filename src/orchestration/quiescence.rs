//! Multi-signal quiescence detection for the run loop.
//!
//! Every tick the orchestrator feeds in the frontier's liveness fingerprint
//! and the workers' consecutive-idle floor. The run is quiescent only when
//! pending bytes and outstanding claims are both zero AND the fingerprint has
//! held still for a sustained window (or every worker has idled long enough).
//! The triple condition guards the two race modes: a worker that just opened
//! a bucket (locks non-zero, pending zero) and a worker mid-discovery between
//! batch flushes (pending briefly non-zero).

use crate::config::Config;
use crate::frontier::FrontierSnapshot;

pub struct QuiescenceDetector {
    last: Option<FrontierSnapshot>,
    stable_cycles: u32,
}

impl QuiescenceDetector {
    pub fn new() -> Self {
        Self {
            last: None,
            stable_cycles: 0,
        }
    }

    pub fn stable_cycles(&self) -> u32 {
        self.stable_cycles
    }

    /// Feed one tick's observation; returns true once quiescent.
    pub fn observe(&mut self, snapshot: FrontierSnapshot, workers_idle: Option<u64>) -> bool {
        if self.last.as_ref() == Some(&snapshot) {
            self.stable_cycles += 1;
        } else {
            self.stable_cycles = 0;
            self.last = Some(snapshot.clone());
        }

        let drained = snapshot.pending_bytes == 0 && snapshot.claim_lock_count == 0;
        let settled = self.stable_cycles >= Config::QUIESCENT_STABLE_CYCLES
            || workers_idle
                .map(|idle| idle >= Config::QUIESCENT_IDLE_CYCLES)
                .unwrap_or(false);
        drained && settled
    }
}

impl Default for QuiescenceDetector {
    fn default() -> Self {
        Self::new()
    }
}
