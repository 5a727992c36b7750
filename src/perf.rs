use crate::Context;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Cycle accounting for a tile's memory hierarchy, kept per logical
/// context so main and companion never interleave.
///
/// A flat access-time model: each level charges its configured lookup
/// latency to the issuing context. Pipeline timing is out of scope.
#[derive(Debug)]
pub struct ShmemPerfModel {
    cycles: [AtomicU64; 2],
    enabled: AtomicBool,
}

impl Default for ShmemPerfModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ShmemPerfModel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cycles: [AtomicU64::new(0), AtomicU64::new(0)],
            enabled: AtomicBool::new(true),
        }
    }

    pub fn incr_cycles(&self, ctx: Context, cycles: u64) {
        if self.enabled.load(Ordering::Relaxed) {
            self.cycles[ctx.index()].fetch_add(cycles, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn cycles(&self, ctx: Context) -> u64 {
        self.cycles[ctx.index()].load(Ordering::Relaxed)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> stats::Cycles {
        stats::Cycles {
            main: self.cycles(Context::Main),
            companion: self.cycles(Context::Companion),
        }
    }
}
