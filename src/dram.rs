use crate::{address, config};
use std::collections::HashMap;

/// Backing store behind a home directory.
///
/// Timing is a flat per-access latency; queueing and device modeling are
/// out of scope. Blocks that were never written read as zeroes.
#[derive(Debug)]
pub struct DramCntlr {
    block_size: u32,
    latency: u64,
    blocks: HashMap<address, Box<[u8]>>,
    stats: stats::Dram,
    enabled: bool,
}

impl DramCntlr {
    #[must_use]
    pub fn new(config: &config::DramConfig, block_size: u32) -> Self {
        Self {
            block_size,
            latency: config.latency,
            blocks: HashMap::new(),
            stats: stats::Dram::default(),
            enabled: true,
        }
    }

    pub fn read_block(&mut self, addr: address) -> Vec<u8> {
        if self.enabled {
            self.stats.reads += 1;
            self.stats.busy_cycles += self.latency;
        }
        log::trace!("dram::read_block({addr:#x})");
        self.blocks
            .get(&addr)
            .map_or_else(|| vec![0; self.block_size as usize], |block| block.to_vec())
    }

    pub fn write_block(&mut self, addr: address, data: &[u8]) {
        assert_eq!(
            data.len(),
            self.block_size as usize,
            "dram writes are block granular"
        );
        if self.enabled {
            self.stats.writes += 1;
            self.stats.busy_cycles += self.latency;
        }
        log::trace!("dram::write_block({addr:#x})");
        self.blocks.insert(addr, data.to_vec().into_boxed_slice());
    }

    /// Inspection without touching counters.
    #[must_use]
    pub fn peek_block(&self, addr: address) -> Option<&[u8]> {
        self.blocks.get(&addr).map(AsRef::as_ref)
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    #[must_use]
    pub fn stats(&self) -> &stats::Dram {
        &self.stats
    }
}
