use super::block::Line;
use crate::address;
use crate::config::ReplacementPolicy;
use itertools::Itertools;
use smallvec::SmallVec;

/// One set of a set-associative cache: a fixed number of ways plus the
/// replacement policy used to choose victims.
#[derive(Debug)]
pub struct CacheSet {
    ways: SmallVec<[Line; 8]>,
    policy: ReplacementPolicy,
}

impl CacheSet {
    #[must_use]
    pub fn new(associativity: usize, block_size: u32, policy: ReplacementPolicy) -> Self {
        let ways = (0..associativity).map(|_| Line::new(block_size)).collect();
        Self { ways, policy }
    }

    /// Index of the way holding `tag`, if any. At most one way per set may
    /// hold a given tag.
    #[must_use]
    pub fn find(&self, tag: address) -> Option<usize> {
        self.ways
            .iter()
            .position(|line| line.is_valid() && line.info.tag == tag)
    }

    /// Way to install a new block into: a free way if one exists, otherwise
    /// the replacement policy's victim. Ties break on the lowest way index
    /// so eviction is deterministic.
    #[must_use]
    pub fn victim(&self) -> usize {
        if let Some(free) = self.ways.iter().position(|line| !line.is_valid()) {
            return free;
        }
        match self.policy {
            ReplacementPolicy::LRU => self
                .ways
                .iter()
                .position_min_by_key(|line| line.info.last_access_time),
            ReplacementPolicy::FIFO => self
                .ways
                .iter()
                .position_min_by_key(|line| line.info.alloc_time),
        }
        .expect("cache set has at least one way")
    }

    #[must_use]
    pub fn way(&self, idx: usize) -> &Line {
        &self.ways[idx]
    }

    pub fn way_mut(&mut self, idx: usize) -> &mut Line {
        &mut self.ways[idx]
    }

    #[must_use]
    pub fn num_valid(&self) -> usize {
        self.ways.iter().filter(|line| line.is_valid()).count()
    }

    #[must_use]
    pub fn associativity(&self) -> usize {
        self.ways.len()
    }
}
