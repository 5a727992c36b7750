use crate::cache::{Cache, MemOp, State};
use crate::l2::L2CacheCntlr;
use crate::perf::ShmemPerfModel;
use crate::shmem_msg::MemComponent;
use crate::sync::{Arc, Mutex};
use crate::{address, config, Context, TileId};

/// The private instruction and data caches of one logical context.
#[derive(Debug)]
pub struct L1Caches {
    pub icache: Cache,
    pub dcache: Cache,
}

impl L1Caches {
    #[must_use]
    pub fn new(ctx: Context, tile_id: TileId, config: &config::MemoryConfig) -> Self {
        let prefix = match ctx {
            Context::Main => format!("tile {tile_id} L1"),
            Context::Companion => format!("tile {tile_id} companion L1"),
        };
        Self {
            icache: Cache::new(format!("{prefix}I"), &config.l1_icache, config.block_size),
            dcache: Cache::new(format!("{prefix}D"), &config.l1_dcache, config.block_size),
        }
    }

    #[must_use]
    pub fn cache(&self, component: MemComponent) -> &Cache {
        match component {
            MemComponent::L1_ICACHE | MemComponent::COMPANION_L1_ICACHE => &self.icache,
            MemComponent::L1_DCACHE | MemComponent::COMPANION_L1_DCACHE => &self.dcache,
            other => panic!("component {other} is not an L1 cache"),
        }
    }

    pub fn cache_mut(&mut self, component: MemComponent) -> &mut Cache {
        match component {
            MemComponent::L1_ICACHE | MemComponent::COMPANION_L1_ICACHE => &mut self.icache,
            MemComponent::L1_DCACHE | MemComponent::COMPANION_L1_DCACHE => &mut self.dcache,
            other => panic!("component {other} is not an L1 cache"),
        }
    }

    /// Inclusion: drop this block from both caches.
    pub fn invalidate_all(&mut self, addr: address) {
        self.icache.invalidate(addr);
        self.dcache.invalidate(addr);
    }

    /// Downgrade any resident copies to SHARED.
    pub fn downgrade(&mut self, addr: address) {
        for cache in [&mut self.icache, &mut self.dcache] {
            if cache.peek(addr).is_some() {
                cache.set_state(addr, State::SHARED);
            }
        }
    }

    pub fn enable(&mut self) {
        self.icache.enable();
        self.dcache.enable();
    }

    pub fn disable(&mut self) {
        self.icache.disable();
        self.dcache.disable();
    }
}

/// L1 cache controller for one logical context.
///
/// Two instances exist per tile (main and companion), both backed by the
/// same shared L2. A miss suspends the issuing context until the L2 (and,
/// past it, the home directory) round trip completes.
#[derive(Debug)]
pub struct L1CacheCntlr {
    ctx: Context,
    caches: Arc<Mutex<L1Caches>>,
    l2: Arc<L2CacheCntlr>,
    perf: Arc<ShmemPerfModel>,
    block_size: u32,
    icache_access_time: u64,
    dcache_access_time: u64,
    l2_access_time: u64,
}

impl L1CacheCntlr {
    #[must_use]
    pub fn new(
        ctx: Context,
        config: &config::MemoryConfig,
        caches: Arc<Mutex<L1Caches>>,
        l2: Arc<L2CacheCntlr>,
        perf: Arc<ShmemPerfModel>,
    ) -> Self {
        Self {
            ctx,
            caches,
            l2,
            perf,
            block_size: config.block_size,
            icache_access_time: config.l1_icache.access_time,
            dcache_access_time: config.l1_dcache.access_time,
            l2_access_time: config.l2_cache.access_time,
        }
    }

    /// Map a core-facing component onto this context's own caches.
    fn own_component(&self, component: MemComponent) -> MemComponent {
        match (self.ctx, component) {
            (Context::Companion, MemComponent::L1_ICACHE) => MemComponent::COMPANION_L1_ICACHE,
            (Context::Companion, MemComponent::L1_DCACHE) => MemComponent::COMPANION_L1_DCACHE,
            (_, component @ (MemComponent::L1_ICACHE | MemComponent::L1_DCACHE)) => component,
            (_, other) => panic!("component {other} is not issued by a core"),
        }
    }

    /// Process one core memory operation: IDLE -> LOOKUP -> {hit:
    /// complete} | {miss: forward to the shared L2, wait for the reply,
    /// complete}. Blocks the issuing context until done. Returns whether
    /// the first-level lookup hit.
    pub fn process_mem_op(
        &self,
        component: MemComponent,
        op: MemOp,
        addr: address,
        buf: &mut [u8],
    ) -> bool {
        let component = self.own_component(component);
        assert!(
            (addr & address::from(self.block_size - 1)) as usize + buf.len()
                <= self.block_size as usize,
            "memory operation at {addr:#x} crosses a block boundary"
        );
        self.perf.incr_cycles(
            self.ctx,
            match component {
                MemComponent::L1_ICACHE | MemComponent::COMPANION_L1_ICACHE => {
                    self.icache_access_time
                }
                _ => self.dcache_access_time,
            },
        );
        match op {
            MemOp::READ | MemOp::READ_EX => self.process_read(component, op, addr, buf),
            MemOp::WRITE => self.process_write(component, addr, buf),
        }
    }

    fn process_read(
        &self,
        component: MemComponent,
        op: MemOp,
        addr: address,
        buf: &mut [u8],
    ) -> bool {
        {
            let mut caches = self.caches.lock();
            if caches.cache_mut(component).access(addr, op, buf).is_some() {
                return true;
            }
        }
        // miss: the shared L2 (and past it the coherence protocol)
        // services the operation
        loop {
            self.perf.incr_cycles(self.ctx, self.l2_access_time);
            match self.l2.read_through(self.ctx, component, op, addr, buf) {
                Ok(()) => return false,
                Err(waiter) => waiter.wait(),
            }
        }
    }

    fn process_write(&self, component: MemComponent, addr: address, buf: &mut [u8]) -> bool {
        loop {
            self.perf.incr_cycles(self.ctx, self.l2_access_time);
            match self.l2.write_through(self.ctx, component, addr, buf) {
                Ok(l1_hit) => return l1_hit,
                Err(waiter) => waiter.wait(),
            }
        }
    }

    #[must_use]
    pub fn caches(&self) -> &Arc<Mutex<L1Caches>> {
        &self.caches
    }

    /// (instruction cache, data cache) counter snapshots.
    #[must_use]
    pub fn stats(&self) -> (stats::Cache, stats::Cache) {
        let caches = self.caches.lock();
        (caches.icache.stats().clone(), caches.dcache.stats().clone())
    }

    pub fn enable(&self) {
        self.caches.lock().enable();
    }

    pub fn disable(&self) {
        self.caches.lock().disable();
    }
}
