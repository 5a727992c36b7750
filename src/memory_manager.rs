use crate::cache::{MemOp, State};
use crate::directory::{DirectoryEntry, DramDirectoryCntlr};
use crate::home_lookup::AddressHomeLookup;
use crate::l1::{L1CacheCntlr, L1Caches};
use crate::l2::L2CacheCntlr;
use crate::lock::CrossContextLock;
use crate::network::{Interconnect, MsgPort, Packet};
use crate::perf::ShmemPerfModel;
use crate::shmem_msg::MemComponent;
use crate::sync::{Arc, Mutex};
use crate::{address, config, Context, TileId};
use std::sync::atomic::{AtomicBool, Ordering};

/// Multi-step-atomic signal accompanying a memory operation.
///
/// A LOCK operation acquires the tile's cross-context token and keeps it
/// across calls until the matching UNLOCK operation releases it, making
/// the sequence indivisible with respect to the sibling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LockSignal {
    NONE,
    LOCK,
    UNLOCK,
}

/// Per-tile assembly of the memory hierarchy.
///
/// Exclusively owns both L1 controllers, the shared L2 controller and, on
/// memory-controller tiles, the directory and DRAM controllers. Routes
/// incoming network messages to the component they address.
#[derive(Debug)]
pub struct MemoryManager {
    tile_id: TileId,
    l1_cntlrs: [L1CacheCntlr; 2],
    l2_cntlr: Arc<L2CacheCntlr>,
    directory_cntlr: Option<Mutex<DramDirectoryCntlr>>,
    token: CrossContextLock,
    atomic_pending: [AtomicBool; 2],
    perf: Arc<ShmemPerfModel>,
    enabled: AtomicBool,
}

impl MemoryManager {
    #[must_use]
    pub fn new(
        tile_id: TileId,
        config: &Arc<config::MemoryConfig>,
        network: Arc<dyn Interconnect>,
    ) -> Self {
        let port = MsgPort::new(tile_id, network);
        let home_tiles = config.home_tiles();
        let home_lookup =
            AddressHomeLookup::new(config.directory.home_lookup_param, home_tiles.clone());
        let perf = Arc::new(ShmemPerfModel::new());

        let main_caches = Arc::new(Mutex::new(L1Caches::new(Context::Main, tile_id, config)));
        let companion_caches = Arc::new(Mutex::new(L1Caches::new(
            Context::Companion,
            tile_id,
            config,
        )));

        let l2_cntlr = Arc::new(L2CacheCntlr::new(
            tile_id,
            config,
            [Arc::clone(&main_caches), Arc::clone(&companion_caches)],
            home_lookup,
            port.clone(),
        ));

        let l1_cntlrs = [
            L1CacheCntlr::new(
                Context::Main,
                config,
                main_caches,
                Arc::clone(&l2_cntlr),
                Arc::clone(&perf),
            ),
            L1CacheCntlr::new(
                Context::Companion,
                config,
                companion_caches,
                Arc::clone(&l2_cntlr),
                Arc::clone(&perf),
            ),
        ];

        let directory_cntlr = home_tiles
            .contains(&tile_id)
            .then(|| Mutex::new(DramDirectoryCntlr::new(tile_id, config, port)));

        Self {
            tile_id,
            l1_cntlrs,
            l2_cntlr,
            directory_cntlr,
            token: CrossContextLock::new(),
            atomic_pending: [AtomicBool::new(false), AtomicBool::new(false)],
            perf,
            enabled: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn tile_id(&self) -> TileId {
        self.tile_id
    }

    #[must_use]
    pub fn has_memory_controller(&self) -> bool {
        self.directory_cntlr.is_some()
    }

    /// Core-facing entry point for one memory operation of `ctx`.
    ///
    /// Every operation acquires the cross-context token before touching
    /// the hierarchy unless it is the UNLOCK half of an atomic sequence
    /// (which already holds it from the LOCK half), and releases it
    /// afterwards unless it is the LOCK half. Pairing violations are
    /// caller bugs and fatal.
    pub fn initiate_memory_access(
        &self,
        ctx: Context,
        component: MemComponent,
        lock_signal: LockSignal,
        op: MemOp,
        addr: address,
        offset: u32,
        buf: &mut [u8],
    ) -> bool {
        log::trace!(
            "tile {}: {ctx} core {op} {addr:#x}+{offset} ({lock_signal})",
            self.tile_id
        );
        let pending = &self.atomic_pending[ctx.index()];
        if lock_signal == LockSignal::UNLOCK {
            assert!(
                pending.load(Ordering::Relaxed),
                "context {ctx} issued UNLOCK without a pending locked sequence"
            );
            pending.store(false, Ordering::Relaxed);
        } else {
            self.token.acquire(ctx);
        }

        let hit = self.l1_cntlrs[ctx.index()].process_mem_op(
            component,
            op,
            addr + address::from(offset),
            buf,
        );

        if lock_signal == LockSignal::LOCK {
            assert!(
                !pending.load(Ordering::Relaxed),
                "context {ctx} issued LOCK twice without an intervening UNLOCK"
            );
            pending.store(true, Ordering::Relaxed);
        } else {
            self.token.release(ctx);
        }
        hit
    }

    /// Network-side entry point: typed dispatch on the (receiver
    /// component, sender component) pair. Unrecognized pairs are wiring
    /// bugs and fatal.
    pub fn handle_msg_from_network(&self, packet: Packet) {
        let Packet { sender, msg } = packet;
        if self.enabled.load(Ordering::Relaxed) {
            log::debug!("tile {}: got shmem msg {msg} from tile {sender}", self.tile_id);
        }
        match msg.receiver_component {
            MemComponent::L2_CACHE => match msg.sender_component {
                MemComponent::DRAM_DIR => {
                    self.l2_cntlr.handle_msg_from_dram_directory(sender, &msg);
                }
                other => panic!(
                    "tile {}: unrecognized sender component {other} for the L2 cache",
                    self.tile_id
                ),
            },
            MemComponent::DRAM_DIR => match msg.sender_component {
                MemComponent::L2_CACHE => {
                    let directory = self
                        .directory_cntlr
                        .as_ref()
                        .unwrap_or_else(|| {
                            panic!("tile {} has no memory controller", self.tile_id)
                        });
                    directory.lock().handle_msg_from_l2(sender, &msg);
                }
                other => panic!(
                    "tile {}: unrecognized sender component {other} for the directory",
                    self.tile_id
                ),
            },
            other => panic!(
                "tile {}: unrecognized receiver component {other}",
                self.tile_id
            ),
        }
    }

    /// Start counting accesses and cycles (end of warm-up).
    pub fn enable_models(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        for l1 in &self.l1_cntlrs {
            l1.enable();
        }
        self.l2_cntlr.enable();
        if let Some(ref directory) = self.directory_cntlr {
            directory.lock().enable();
        }
        self.perf.enable();
    }

    pub fn disable_models(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        for l1 in &self.l1_cntlrs {
            l1.disable();
        }
        self.l2_cntlr.disable();
        if let Some(ref directory) = self.directory_cntlr {
            directory.lock().disable();
        }
        self.perf.disable();
    }

    /// Counter snapshot of every component on this tile.
    #[must_use]
    pub fn stats(&self) -> stats::Tile {
        let (l1i, l1d) = self.l1_cntlrs[Context::Main.index()].stats();
        let (companion_l1i, companion_l1d) = self.l1_cntlrs[Context::Companion.index()].stats();
        let directory = self
            .directory_cntlr
            .as_ref()
            .map(|directory| directory.lock().stats().clone());
        let dram = self
            .directory_cntlr
            .as_ref()
            .map(|directory| directory.lock().dram().stats().clone());
        stats::Tile {
            l1i,
            l1d,
            companion_l1i,
            companion_l1d,
            l2: self.l2_cntlr.stats(),
            directory,
            dram,
            cycles: self.perf.snapshot(),
        }
    }

    /// Nothing in flight at this tile's L2 or directory.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.l2_cntlr.is_idle()
            && self
                .directory_cntlr
                .as_ref()
                .map_or(true, |directory| directory.lock().is_idle())
    }

    // protocol-state inspection, used by the test harness

    #[must_use]
    pub fn l2_state(&self, addr: address) -> Option<State> {
        self.l2_cntlr.peek_state(addr)
    }

    #[must_use]
    pub fn l2_block(&self, addr: address) -> Option<Vec<u8>> {
        self.l2_cntlr.peek_block(addr)
    }

    #[must_use]
    pub fn directory_entry(&self, addr: address) -> Option<DirectoryEntry> {
        self.directory_cntlr
            .as_ref()
            .and_then(|directory| directory.lock().peek_entry(addr).cloned())
    }

    #[must_use]
    pub fn dram_block(&self, addr: address) -> Option<Vec<u8>> {
        self.directory_cntlr.as_ref().and_then(|directory| {
            directory
                .lock()
                .dram()
                .peek_block(addr)
                .map(<[u8]>::to_vec)
        })
    }

    #[must_use]
    pub fn token_holder(&self) -> Option<Context> {
        self.token.holder()
    }
}
