use serde::{Deserialize, Serialize};

/// Cumulative counters of one DRAM backing-store controller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dram {
    pub reads: u64,
    pub writes: u64,
    /// Cycles spent in DRAM accesses (latency model only, no queueing).
    pub busy_cycles: u64,
}

impl std::ops::AddAssign for Dram {
    fn add_assign(&mut self, other: Self) {
        self.reads += other.reads;
        self.writes += other.writes;
        self.busy_cycles += other.busy_cycles;
    }
}
