use super::block::{BlockInfo, State};
use super::set::CacheSet;
use super::MemOp;
use crate::{address, config};

/// A block pushed out by `insert` or removed by `invalidate`, reported to
/// the caller so it can propagate the eviction outward (write back if the
/// prior state was MODIFIED).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedBlock {
    pub addr: address,
    pub info: BlockInfo,
    pub data: Box<[u8]>,
}

/// Generic set-associative cache: an array of sets, each holding
/// `associativity` ways of block metadata and data.
///
/// Pure lookup and eviction machinery; coherence is the owning
/// controller's concern. Geometry is fixed at construction. Counters are
/// monotonic while enabled and are never reset.
#[derive(Debug)]
pub struct Cache {
    name: String,
    block_size: u32,
    block_size_log2: u32,
    num_sets: usize,
    sets: Vec<CacheSet>,
    enabled: bool,
    stats: stats::Cache,
    /// Logical access clock driving replacement bookkeeping.
    time: u64,
}

impl Cache {
    #[must_use]
    pub fn new(name: impl Into<String>, config: &config::CacheConfig, block_size: u32) -> Self {
        let name = name.into();
        let num_sets = config.num_sets(block_size);
        assert!(
            num_sets.is_power_of_two(),
            "{name}: number of sets ({num_sets}) must be a power of two"
        );
        let sets = (0..num_sets)
            .map(|_| CacheSet::new(config.associativity, block_size, config.replacement_policy))
            .collect();
        log::debug!("{}: {}", name, config.describe(block_size));
        Self {
            name,
            block_size,
            block_size_log2: block_size.trailing_zeros(),
            num_sets,
            sets,
            enabled: true,
            stats: stats::Cache::default(),
            time: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn block_addr(&self, addr: address) -> address {
        addr & !address::from(self.block_size - 1)
    }

    #[inline]
    fn set_index(&self, addr: address) -> usize {
        ((addr >> self.block_size_log2) as usize) & (self.num_sets - 1)
    }

    #[inline]
    fn tag(&self, addr: address) -> address {
        self.block_addr(addr)
    }

    #[inline]
    fn offset(&self, addr: address) -> usize {
        (addr & address::from(self.block_size - 1)) as usize
    }

    /// Access a line for a core operation.
    ///
    /// On a hit the replacement bookkeeping is updated and data is copied
    /// out of the line (READ/READ_EX) or into it (WRITE) at the address's
    /// block offset; a miss mutates nothing. A WRITE against a block
    /// without write permission is a miss. Counts one access either way.
    pub fn access(&mut self, addr: address, op: MemOp, buf: &mut [u8]) -> Option<State> {
        self.time += 1;
        let time = self.time;
        let offset = self.offset(addr);
        assert!(
            offset + buf.len() <= self.block_size as usize,
            "{}: access at {addr:#x} ({} bytes) crosses a block boundary",
            self.name,
            buf.len()
        );
        let tag = self.tag(addr);
        let set_idx = self.set_index(addr);
        let set = &mut self.sets[set_idx];

        let way_idx = set
            .find(tag)
            .filter(|&idx| op.permitted(set.way(idx).info.state));
        let result = way_idx.map(|idx| {
            let line = set.way_mut(idx);
            line.touch(time);
            match op {
                MemOp::READ | MemOp::READ_EX => {
                    buf.copy_from_slice(&line.data()[offset..offset + buf.len()]);
                }
                MemOp::WRITE => {
                    line.data_mut()[offset..offset + buf.len()].copy_from_slice(buf);
                }
            }
            line.info.state
        });

        if self.enabled {
            self.stats.accesses += 1;
            if result.is_some() {
                self.stats.hits += 1;
            } else {
                self.stats.misses += 1;
            }
        }
        log::trace!("{}::access({addr:#x}, {op}) => {result:?}", self.name);
        result
    }

    /// Install a block.
    ///
    /// A full set evicts the configured policy's victim, which is returned
    /// for the caller to write back or drop. Inserting an address that is
    /// already present is a caller bug.
    pub fn insert(&mut self, addr: address, state: State, fill: &[u8]) -> Option<EvictedBlock> {
        assert_eq!(
            fill.len(),
            self.block_size as usize,
            "{}: fill data must be one block",
            self.name
        );
        assert!(state.is_valid(), "{}: insert in state {state}", self.name);
        self.time += 1;
        let time = self.time;
        let tag = self.tag(addr);
        let set_index = self.set_index(addr);
        let set = &mut self.sets[set_index];
        assert!(
            set.find(tag).is_none(),
            "{}: insert at {addr:#x} but the block is already present",
            self.name
        );

        let line = set.way_mut(set.victim());
        let evicted = line.is_valid().then(|| EvictedBlock {
            addr: line.info.tag,
            info: line.info,
            data: line.data().to_vec().into_boxed_slice(),
        });
        line.allocate(tag, state, fill, time);

        if self.enabled {
            self.stats.insertions += 1;
            if evicted.is_some() {
                self.stats.evictions += 1;
            }
        }
        if let Some(ref evicted) = evicted {
            log::trace!(
                "{}::insert({addr:#x}, {state}) evicts {:#x} ({})",
                self.name,
                evicted.addr,
                evicted.info.state
            );
        }
        evicted
    }

    /// Remove the block if present and return it; the caller decides on
    /// write-back based on its prior state. Never counts as an access.
    pub fn invalidate(&mut self, addr: address) -> Option<EvictedBlock> {
        let tag = self.tag(addr);
        let set_idx = self.set_index(addr);
        let set = &mut self.sets[set_idx];
        let idx = set.find(tag)?;
        let line = set.way_mut(idx);
        let evicted = EvictedBlock {
            addr: line.info.tag,
            info: line.info,
            data: line.data().to_vec().into_boxed_slice(),
        };
        line.invalidate();
        Some(evicted)
    }

    /// Read-only lookup with no statistics or replacement side effects.
    #[must_use]
    pub fn peek(&self, addr: address) -> Option<&BlockInfo> {
        let set = &self.sets[self.set_index(addr)];
        set.find(self.tag(addr)).map(|idx| &set.way(idx).info)
    }

    #[must_use]
    pub fn peek_state(&self, addr: address) -> Option<State> {
        self.peek(addr).map(|info| info.state)
    }

    /// In-place coherence state change; the block must be present.
    pub fn set_state(&mut self, addr: address, state: State) {
        assert!(state.is_valid(), "{}: use invalidate to drop a block", self.name);
        let tag = self.tag(addr);
        let set_idx = self.set_index(addr);
        let set = &mut self.sets[set_idx];
        let idx = set
            .find(tag)
            .unwrap_or_else(|| panic!("{}: state change for absent block {addr:#x}", self.name));
        set.way_mut(idx).info.state = state;
    }

    /// The block's data, protocol-internal (no statistics).
    #[must_use]
    pub fn read_block(&self, addr: address) -> Option<&[u8]> {
        let set = &self.sets[self.set_index(addr)];
        set.find(self.tag(addr)).map(|idx| set.way(idx).data())
    }

    /// Overwrite part of a resident block, protocol-internal.
    pub fn write_block(&mut self, addr: address, offset: usize, data: &[u8]) {
        assert!(
            offset + data.len() <= self.block_size as usize,
            "{}: block write out of bounds",
            self.name
        );
        let tag = self.tag(addr);
        let set_idx = self.set_index(addr);
        let set = &mut self.sets[set_idx];
        let idx = set
            .find(tag)
            .unwrap_or_else(|| panic!("{}: data write to absent block {addr:#x}", self.name));
        set.way_mut(idx).data_mut()[offset..offset + data.len()].copy_from_slice(data);
    }

    /// A refill from the next level completed.
    pub fn record_fill(&mut self) {
        if self.enabled {
            self.stats.fills += 1;
        }
    }

    /// A dirty block was handed back to its home.
    pub fn record_writeback(&mut self) {
        if self.enabled {
            self.stats.writebacks += 1;
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    #[must_use]
    pub fn stats(&self) -> &stats::Cache {
        &self.stats
    }

    #[must_use]
    pub fn num_valid_blocks(&self) -> usize {
        self.sets.iter().map(CacheSet::num_valid).sum()
    }

    #[must_use]
    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub fn sets(&self) -> &[CacheSet] {
        &self.sets
    }
}
