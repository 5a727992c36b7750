use serde::{Deserialize, Serialize};

/// Cumulative counters of one cache instance.
///
/// All counters are monotonically non-decreasing for the lifetime of the
/// cache unless counting is disabled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
    pub fills: u64,
    pub writebacks: u64,
}

impl Cache {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.accesses as f64
        }
    }
}

impl std::ops::AddAssign for Cache {
    fn add_assign(&mut self, other: Self) {
        self.accesses += other.accesses;
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.insertions += other.insertions;
        self.fills += other.fills;
        self.writebacks += other.writebacks;
    }
}

#[cfg(test)]
mod tests {
    use super::Cache;

    #[test]
    fn add_assign_merges_counters() {
        let mut a = Cache {
            accesses: 10,
            hits: 8,
            misses: 2,
            ..Cache::default()
        };
        a += Cache {
            accesses: 5,
            hits: 1,
            misses: 4,
            evictions: 1,
            ..Cache::default()
        };
        assert_eq!(a.accesses, 15);
        assert_eq!(a.hits, 9);
        assert_eq!(a.misses, 6);
        assert_eq!(a.evictions, 1);
    }

    #[test]
    fn hit_rate_handles_zero_accesses() {
        assert_eq!(Cache::default().hit_rate(), 0.0);
    }
}
