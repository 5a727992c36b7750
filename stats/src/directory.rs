use serde::{Deserialize, Serialize};

/// Cumulative counters of one home-directory controller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    /// Coherence requests received from remote (and local) L2 caches.
    pub requests: u64,
    /// Targeted invalidation messages sent to tracked sharers.
    pub invalidations_sent: u64,
    /// Invalidation rounds that had to be broadcast to every tile.
    pub broadcasts: u64,
    /// Times a sharer set exceeded the hardware-tracked limit.
    pub sharer_overflows: u64,
    /// Directory entries nullified to make room for new ones.
    pub evictions: u64,
    /// Dirty blocks written back to the backing store.
    pub writebacks: u64,
    /// Cycles spent in directory lookups.
    pub access_cycles: u64,
}

impl std::ops::AddAssign for Directory {
    fn add_assign(&mut self, other: Self) {
        self.requests += other.requests;
        self.invalidations_sent += other.invalidations_sent;
        self.broadcasts += other.broadcasts;
        self.sharer_overflows += other.sharer_overflows;
        self.evictions += other.evictions;
        self.writebacks += other.writebacks;
        self.access_cycles += other.access_cycles;
    }
}
