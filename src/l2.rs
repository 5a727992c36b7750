use crate::cache::{Cache, EvictedBlock, MemOp, State};
use crate::home_lookup::AddressHomeLookup;
use crate::l1::L1Caches;
use crate::network::MsgPort;
use crate::shmem_msg::{MemComponent, MsgKind, ShmemMsg};
use crate::sync::{Arc, Condvar, Mutex, MutexGuard};
use crate::{address, config, Context, TileId};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

/// A context blocked on an L2 miss until the reply for its address
/// arrives.
#[derive(Debug, Default)]
pub struct MissWaiter {
    done: Mutex<bool>,
    cv: Condvar,
}

impl MissWaiter {
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cv.wait(&mut done);
        }
    }

    fn signal(&self) {
        *self.done.lock() = true;
        self.cv.notify_all();
    }
}

/// One in-flight coherence transaction for a block, with every context
/// queued behind it in arrival order.
#[derive(Debug, Default)]
struct Outstanding {
    waiters: VecDeque<Arc<MissWaiter>>,
}

#[derive(Debug)]
struct L2Inner {
    cache: Cache,
    /// At most one coherence transaction per address is in flight from
    /// this tile; later requests for the same address wait behind it.
    outstanding: HashMap<address, Outstanding>,
}

/// Shared L2 controller: arbitrates the tile's two L1 contexts, maintains
/// inclusion over their caches, and is the tile's only party to the
/// coherence protocol.
///
/// Lock order within a tile is L2 before L1; no lock is held while a
/// context sleeps on a [`MissWaiter`].
#[derive(Debug)]
pub struct L2CacheCntlr {
    tile_id: TileId,
    inner: Mutex<L2Inner>,
    l1s: [Arc<Mutex<L1Caches>>; 2],
    home_lookup: AddressHomeLookup,
    port: MsgPort,
    block_size: u32,
}

impl L2CacheCntlr {
    #[must_use]
    pub fn new(
        tile_id: TileId,
        config: &config::MemoryConfig,
        l1s: [Arc<Mutex<L1Caches>>; 2],
        home_lookup: AddressHomeLookup,
        port: MsgPort,
    ) -> Self {
        Self {
            tile_id,
            inner: Mutex::new(L2Inner {
                cache: Cache::new(
                    format!("tile {tile_id} L2"),
                    &config.l2_cache,
                    config.block_size,
                ),
                outstanding: HashMap::new(),
            }),
            l1s,
            home_lookup,
            port,
            block_size: config.block_size,
        }
    }

    /// Service an L1 read miss.
    ///
    /// When the L2 holds the block with sufficient permission, the data is
    /// copied into `buf` and the issuing context's L1 is filled
    /// (inclusion); otherwise a transaction to the block's home directory
    /// is started (or an in-flight one joined) and the returned waiter
    /// must be waited on before retrying.
    pub fn read_through(
        &self,
        ctx: Context,
        component: MemComponent,
        op: MemOp,
        addr: address,
        buf: &mut [u8],
    ) -> Result<(), Arc<MissWaiter>> {
        let block_addr = self.block_addr(addr);
        let mut inner = self.inner.lock();
        match inner.cache.access(addr, op, buf) {
            Some(l2_state) => {
                let data = inner
                    .cache
                    .read_block(block_addr)
                    .expect("hit block is resident")
                    .to_vec();
                self.fill_l1(ctx, component, block_addr, l2_state, &data);
                Ok(())
            }
            None => Err(self.start_or_join_transaction(&mut inner, op, block_addr)),
        }
    }

    /// Service a store.
    ///
    /// Stores go through the L2 so a line is never dirtier in an L1 than
    /// in the L2 (write-through between the levels); the issuing context's
    /// L1 is filled or updated alongside. Returns whether the L1 line was
    /// already writable.
    pub fn write_through(
        &self,
        ctx: Context,
        component: MemComponent,
        addr: address,
        buf: &[u8],
    ) -> Result<bool, Arc<MissWaiter>> {
        let block_addr = self.block_addr(addr);
        let mut inner = self.inner.lock();

        let mut tmp = buf.to_vec();
        if inner.cache.access(addr, MemOp::WRITE, &mut tmp).is_none() {
            return Err(self.start_or_join_transaction(&mut inner, MemOp::WRITE, block_addr));
        }
        // the L2 line now carries the stored bytes
        let data = inner
            .cache
            .read_block(block_addr)
            .expect("hit block is resident")
            .to_vec();

        debug_assert!(
            matches!(
                component,
                MemComponent::L1_DCACHE | MemComponent::COMPANION_L1_DCACHE
            ),
            "stores are issued through a data cache"
        );
        let l1_hit = {
            let mut l1 = self.l1s[ctx.index()].lock();
            let l1_cache = l1.cache_mut(component);
            let mut tmp = buf.to_vec();
            let l1_hit = l1_cache.access(addr, MemOp::WRITE, &mut tmp).is_some();
            if !l1_hit {
                if l1_cache.peek(block_addr).is_some() {
                    l1_cache.set_state(block_addr, State::MODIFIED);
                    l1_cache.write_block(block_addr, 0, &data);
                } else {
                    l1_cache.record_fill();
                    // an L1 line is never dirtier than its L2 line, so the
                    // displaced block leaves silently
                    let _ = l1_cache.insert(block_addr, State::MODIFIED, &data);
                }
            }
            // a stale instruction-cache copy of the stored block must go
            l1.icache.invalidate(block_addr);
            l1_hit
        };
        // the sibling context's copies are stale now; it refills from the
        // L2 on its next access
        self.l1s[1 - ctx.index()].lock().invalidate_all(block_addr);
        Ok(l1_hit)
    }

    /// Install or update the issuing context's L1 copy under the L2 lock.
    fn fill_l1(
        &self,
        ctx: Context,
        component: MemComponent,
        block_addr: address,
        state: State,
        data: &[u8],
    ) {
        let mut l1 = self.l1s[ctx.index()].lock();
        let l1_cache = l1.cache_mut(component);
        if l1_cache.peek(block_addr).is_some() {
            l1_cache.set_state(block_addr, state);
        } else {
            l1_cache.record_fill();
            let _ = l1_cache.insert(block_addr, state, data);
        }
    }

    fn start_or_join_transaction(
        &self,
        inner: &mut MutexGuard<'_, L2Inner>,
        op: MemOp,
        block_addr: address,
    ) -> Arc<MissWaiter> {
        let waiter = Arc::new(MissWaiter::default());
        match inner.outstanding.entry(block_addr) {
            Entry::Occupied(mut entry) => {
                log::trace!(
                    "tile {} L2: queueing behind in-flight transaction for {block_addr:#x}",
                    self.tile_id
                );
                entry.get_mut().waiters.push_back(Arc::clone(&waiter));
            }
            Entry::Vacant(entry) => {
                entry.insert(Outstanding {
                    waiters: VecDeque::from([Arc::clone(&waiter)]),
                });
                let kind = if op.needs_exclusive() {
                    MsgKind::EX_REQ
                } else {
                    MsgKind::SH_REQ
                };
                let home = self.home_lookup.home_tile(block_addr);
                log::debug!(
                    "tile {} L2: {kind} for {block_addr:#x} -> home tile {home}",
                    self.tile_id
                );
                self.port.send_msg(
                    home,
                    ShmemMsg::new(
                        kind,
                        MemComponent::L2_CACHE,
                        MemComponent::DRAM_DIR,
                        self.tile_id,
                        block_addr,
                        vec![],
                    ),
                );
            }
        }
        waiter
    }

    /// Network-side entry point: replies to this tile's transactions and
    /// coherence actions requested by a home directory. Messages for one
    /// address are processed in arrival order.
    pub fn handle_msg_from_dram_directory(&self, sender: TileId, msg: &ShmemMsg) {
        match msg.kind {
            MsgKind::SH_REP => self.install(msg, State::SHARED),
            MsgKind::EX_REP => self.install(msg, State::MODIFIED),
            MsgKind::INV_REQ | MsgKind::FLUSH_REQ => self.invalidate_from_directory(sender, msg),
            MsgKind::WB_REQ => self.copy_back(sender, msg),
            kind => panic!(
                "tile {} L2 received unrecognized message kind {kind}",
                self.tile_id
            ),
        }
    }

    fn install(&self, msg: &ShmemMsg, state: State) {
        let addr = msg.addr;
        let mut inner = self.inner.lock();
        inner.cache.record_fill();
        if inner.cache.peek(addr).is_some() {
            // e.g. a SHARED line upgraded to MODIFIED while resident
            inner.cache.set_state(addr, state);
            inner.cache.write_block(addr, 0, msg.data());
        } else if let Some(evicted) = inner.cache.insert(addr, state, msg.data()) {
            self.evict_block(&mut inner, &evicted);
        }
        let outstanding = inner.outstanding.remove(&addr).unwrap_or_else(|| {
            panic!(
                "tile {} L2: reply {msg} with no outstanding transaction",
                self.tile_id
            )
        });
        drop(inner);
        // complete queued waiters in arrival order
        for waiter in outstanding.waiters {
            waiter.signal();
        }
    }

    /// Propagate an L2 eviction outward: enforce inclusion on both L1
    /// contexts and hand the block back to its home (with data when it
    /// was dirty, as a plain notice when clean).
    fn evict_block(&self, inner: &mut MutexGuard<'_, L2Inner>, evicted: &EvictedBlock) {
        for l1 in &self.l1s {
            l1.lock().invalidate_all(evicted.addr);
        }
        let home = self.home_lookup.home_tile(evicted.addr);
        if evicted.info.state == State::MODIFIED {
            inner.cache.record_writeback();
            self.port.send_msg(
                home,
                ShmemMsg::new(
                    MsgKind::FLUSH_REP,
                    MemComponent::L2_CACHE,
                    MemComponent::DRAM_DIR,
                    self.tile_id,
                    evicted.addr,
                    evicted.data.to_vec(),
                ),
            );
        } else {
            self.port.send_msg(
                home,
                ShmemMsg::new(
                    MsgKind::INV_REP,
                    MemComponent::L2_CACHE,
                    MemComponent::DRAM_DIR,
                    self.tile_id,
                    evicted.addr,
                    vec![],
                ),
            );
        }
    }

    /// Invalidate on behalf of a home directory. A MODIFIED line returns
    /// its data in the acknowledgement (write-back on invalidate); an
    /// absent line still acknowledges so broadcast rounds converge.
    fn invalidate_from_directory(&self, home: TileId, msg: &ShmemMsg) {
        let addr = msg.addr;
        let mut inner = self.inner.lock();
        for l1 in &self.l1s {
            l1.lock().invalidate_all(addr);
        }
        let evicted = inner.cache.invalidate(addr);
        let reply = match evicted {
            Some(block) if block.info.state == State::MODIFIED => {
                inner.cache.record_writeback();
                ShmemMsg::new(
                    MsgKind::FLUSH_REP,
                    MemComponent::L2_CACHE,
                    MemComponent::DRAM_DIR,
                    msg.requester,
                    addr,
                    block.data.to_vec(),
                )
            }
            _ => ShmemMsg::new(
                MsgKind::INV_REP,
                MemComponent::L2_CACHE,
                MemComponent::DRAM_DIR,
                msg.requester,
                addr,
                vec![],
            ),
        };
        self.port.send_msg(home, reply);
    }

    /// Downgrade to SHARED and copy the dirty data back, keeping the
    /// block readable. If the block was evicted in the meantime the
    /// eviction flush is already on its way; just acknowledge.
    fn copy_back(&self, home: TileId, msg: &ShmemMsg) {
        let addr = msg.addr;
        let mut inner = self.inner.lock();
        match inner.cache.peek_state(addr) {
            Some(State::MODIFIED) => {
                let data = inner
                    .cache
                    .read_block(addr)
                    .expect("modified block is resident")
                    .to_vec();
                inner.cache.set_state(addr, State::SHARED);
                inner.cache.record_writeback();
                for l1 in &self.l1s {
                    l1.lock().downgrade(addr);
                }
                self.port.send_msg(
                    home,
                    ShmemMsg::new(
                        MsgKind::WB_REP,
                        MemComponent::L2_CACHE,
                        MemComponent::DRAM_DIR,
                        msg.requester,
                        addr,
                        data,
                    ),
                );
            }
            Some(state) => panic!(
                "tile {} L2: copy-back request for {addr:#x} in state {state}",
                self.tile_id
            ),
            None => {
                self.port.send_msg(
                    home,
                    ShmemMsg::new(
                        MsgKind::INV_REP,
                        MemComponent::L2_CACHE,
                        MemComponent::DRAM_DIR,
                        msg.requester,
                        addr,
                        vec![],
                    ),
                );
            }
        }
    }

    #[inline]
    fn block_addr(&self, addr: address) -> address {
        addr & !address::from(self.block_size - 1)
    }

    #[must_use]
    pub fn peek_state(&self, addr: address) -> Option<State> {
        self.inner.lock().cache.peek_state(addr)
    }

    #[must_use]
    pub fn peek_block(&self, addr: address) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .cache
            .read_block(addr)
            .map(<[u8]>::to_vec)
    }

    /// No coherence transaction in flight from this tile.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.lock().outstanding.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> stats::Cache {
        self.inner.lock().cache.stats().clone()
    }

    pub fn enable(&self) {
        self.inner.lock().cache.enable();
    }

    pub fn disable(&self) {
        self.inner.lock().cache.disable();
    }
}
