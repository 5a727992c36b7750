use crate::cache::MemOp;
use crate::config::MemoryConfig;
use crate::memory_manager::{LockSignal, MemoryManager};
use crate::network::{Event, Interconnect, LocalNetwork};
use crate::shmem_msg::MemComponent;
use crate::sync::Arc;
use crate::{address, Context, TileId};
use color_eyre::eyre;
use std::sync::atomic::{AtomicU64, Ordering};

/// The assembled multi-tile memory system.
///
/// One [`MemoryManager`] per tile, a channel network between them, and one
/// network thread per tile draining that tile's endpoint in arrival order
/// (the tile's sequential message timeline). Core-facing helpers block the
/// calling thread until the operation completes, exactly like a simulated
/// context suspending on a miss.
pub struct Simulator {
    config: Arc<MemoryConfig>,
    network: Arc<LocalNetwork>,
    tiles: Vec<Arc<MemoryManager>>,
    num_handled: Arc<AtomicU64>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl Simulator {
    pub fn new(config: MemoryConfig) -> eyre::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let (network, receivers) = LocalNetwork::new(config.num_tiles);
        let network = Arc::new(network);
        let tiles: Vec<_> = (0..config.num_tiles)
            .map(|tile_id| {
                Arc::new(MemoryManager::new(
                    tile_id,
                    &config,
                    Arc::clone(&network) as Arc<dyn Interconnect>,
                ))
            })
            .collect();
        let num_handled = Arc::new(AtomicU64::new(0));
        let threads = receivers
            .into_iter()
            .enumerate()
            .map(|(tile_id, receiver)| {
                let manager = Arc::clone(&tiles[tile_id]);
                let num_handled = Arc::clone(&num_handled);
                std::thread::Builder::new()
                    .name(format!("tile-{tile_id}-net"))
                    .spawn(move || {
                        for event in receiver.iter() {
                            match event {
                                Event::Msg(packet) => {
                                    manager.handle_msg_from_network(packet);
                                    num_handled.fetch_add(1, Ordering::SeqCst);
                                }
                                Event::Halt => break,
                            }
                        }
                    })
                    .expect("spawn network thread")
            })
            .collect();
        Ok(Self {
            config,
            network,
            tiles,
            num_handled,
            threads,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[must_use]
    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn tile(&self, tile_id: TileId) -> &Arc<MemoryManager> {
        &self.tiles[tile_id]
    }

    fn split(&self, addr: address) -> (address, u32) {
        let block_addr = addr & !address::from(self.config.block_size - 1);
        (block_addr, (addr - block_addr) as u32)
    }

    /// Blocking core load through the data cache.
    #[must_use]
    pub fn load(&self, tile_id: TileId, ctx: Context, addr: address, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        let (block_addr, offset) = self.split(addr);
        self.tiles[tile_id].initiate_memory_access(
            ctx,
            MemComponent::L1_DCACHE,
            LockSignal::NONE,
            MemOp::READ,
            block_addr,
            offset,
            &mut buf,
        );
        buf
    }

    /// Blocking core store. Returns whether the L1 lookup hit.
    pub fn store(&self, tile_id: TileId, ctx: Context, addr: address, data: &[u8]) -> bool {
        let mut buf = data.to_vec();
        let (block_addr, offset) = self.split(addr);
        self.tiles[tile_id].initiate_memory_access(
            ctx,
            MemComponent::L1_DCACHE,
            LockSignal::NONE,
            MemOp::WRITE,
            block_addr,
            offset,
            &mut buf,
        )
    }

    /// Blocking instruction fetch through the instruction cache.
    #[must_use]
    pub fn instruction_fetch(
        &self,
        tile_id: TileId,
        ctx: Context,
        addr: address,
        len: usize,
    ) -> Vec<u8> {
        let mut buf = vec![0; len];
        let (block_addr, offset) = self.split(addr);
        self.tiles[tile_id].initiate_memory_access(
            ctx,
            MemComponent::L1_ICACHE,
            LockSignal::NONE,
            MemOp::READ,
            block_addr,
            offset,
            &mut buf,
        );
        buf
    }

    /// First half of an atomic read-modify-write: acquires the tile's
    /// cross-context token and reads with exclusive intent.
    #[must_use]
    pub fn load_locked(&self, tile_id: TileId, ctx: Context, addr: address, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        let (block_addr, offset) = self.split(addr);
        self.tiles[tile_id].initiate_memory_access(
            ctx,
            MemComponent::L1_DCACHE,
            LockSignal::LOCK,
            MemOp::READ_EX,
            block_addr,
            offset,
            &mut buf,
        );
        buf
    }

    /// Second half of an atomic read-modify-write: stores and releases
    /// the token.
    pub fn store_unlocked(&self, tile_id: TileId, ctx: Context, addr: address, data: &[u8]) -> bool {
        let mut buf = data.to_vec();
        let (block_addr, offset) = self.split(addr);
        self.tiles[tile_id].initiate_memory_access(
            ctx,
            MemComponent::L1_DCACHE,
            LockSignal::UNLOCK,
            MemOp::WRITE,
            block_addr,
            offset,
            &mut buf,
        )
    }

    pub fn enable_models(&self) {
        for tile in &self.tiles {
            tile.enable_models();
        }
    }

    pub fn disable_models(&self) {
        for tile in &self.tiles {
            tile.disable_models();
        }
    }

    #[must_use]
    pub fn stats(&self) -> stats::Stats {
        stats::Stats {
            tiles: self.tiles.iter().map(|tile| tile.stats()).collect(),
        }
    }

    /// Wait until no message is in flight or being handled and every
    /// controller is idle, so background write-backs settle before
    /// protocol state is inspected.
    pub fn quiesce(&self) {
        loop {
            // a running handler keeps handled strictly behind sent, so
            // equality means the network is empty and no handler is active
            let handled = self.num_handled.load(Ordering::SeqCst);
            let sent = self.network.num_sent();
            if sent == handled && self.tiles.iter().all(|tile| tile.is_idle()) {
                return;
            }
            std::thread::yield_now();
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.network.halt();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}
