use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tilecachesim::cache::State;
use tilecachesim::config::{CacheConfig, DirectoryConfig, DramConfig, MemoryConfig, ReplacementPolicy};
use tilecachesim::directory::DirectoryState;
use tilecachesim::sim::Simulator;
use tilecachesim::{address, Context, TileId};

const BLOCK: u64 = 64;

fn small_config(num_tiles: usize) -> MemoryConfig {
    let l1 = CacheConfig {
        cache_size: 1024,
        associativity: 2,
        replacement_policy: ReplacementPolicy::LRU,
        access_time: 1,
    };
    MemoryConfig {
        num_tiles,
        block_size: BLOCK as u32,
        memory_controller_tiles: vec![0],
        l1_icache: l1.clone(),
        l1_dcache: l1,
        l2_cache: CacheConfig {
            cache_size: 4096,
            associativity: 4,
            replacement_policy: ReplacementPolicy::LRU,
            access_time: 4,
        },
        directory: DirectoryConfig {
            total_entries: 128,
            associativity: 4,
            max_hw_sharers: 8,
            home_lookup_param: 6,
            access_time: 2,
        },
        dram: DramConfig { latency: 10 },
    }
}

fn as_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().unwrap())
}

#[test]
fn write_then_remote_read_end_to_end() {
    let sim = Simulator::new(small_config(4)).unwrap();
    let home: TileId = 0;
    // block aligned
    let x: address = 0x1040;

    // tile 1 writes X and becomes the owner
    sim.store(1, Context::Main, x, &7u32.to_le_bytes());
    sim.quiesce();
    assert_eq!(sim.tile(1).l2_state(x), Some(State::MODIFIED));
    let entry = sim.tile(home).directory_entry(x).unwrap();
    assert_eq!(entry.state, DirectoryState::MODIFIED);
    assert_eq!(entry.owner, Some(1));

    // tile 2 reads X: the directory asks tile 1 to copy the dirty data
    // back, persists it, and both tiles end up sharing the block
    let loaded = sim.load(2, Context::Main, x, 4);
    assert_eq!(as_u32(&loaded), 7);
    sim.quiesce();

    let entry = sim.tile(home).directory_entry(x).unwrap();
    assert_eq!(entry.state, DirectoryState::SHARED);
    assert_eq!(entry.owner, None);
    assert_eq!(entry.sharers(), vec![1, 2]);
    assert_eq!(sim.tile(1).l2_state(x), Some(State::SHARED));
    assert_eq!(sim.tile(2).l2_state(x), Some(State::SHARED));

    // the write-back reached the backing store
    let dram = sim.tile(home).dram_block(x).unwrap();
    assert_eq!(as_u32(&dram[..4]), 7);

    // dram writes came from the copy-back, not from the read itself
    let stats = sim.stats();
    assert_eq!(stats.tiles[home].dram.as_ref().unwrap().writes, 1);
}

#[test]
fn write_invalidates_all_sharers() {
    let sim = Simulator::new(small_config(4)).unwrap();
    let x: address = 0x2000;

    for tile in [1, 2, 3] {
        assert_eq!(as_u32(&sim.load(tile, Context::Main, x, 4)), 0);
    }
    sim.quiesce();
    let entry = sim.tile(0).directory_entry(x).unwrap();
    assert_eq!(entry.state, DirectoryState::SHARED);
    assert_eq!(entry.sharers(), vec![1, 2, 3]);

    sim.store(2, Context::Main, x, &0xdead_beefu32.to_le_bytes());
    sim.quiesce();

    let entry = sim.tile(0).directory_entry(x).unwrap();
    assert_eq!(entry.state, DirectoryState::MODIFIED);
    assert_eq!(entry.owner, Some(2));
    assert_eq!(sim.tile(1).l2_state(x), None);
    assert_eq!(sim.tile(3).l2_state(x), None);
    assert_eq!(sim.tile(2).l2_state(x), Some(State::MODIFIED));

    // the new value is visible everywhere afterwards
    assert_eq!(as_u32(&sim.load(1, Context::Main, x, 4)), 0xdead_beef);
}

#[test]
fn sharer_overflow_falls_back_to_broadcast_invalidation() {
    let mut config = small_config(4);
    config.directory.max_hw_sharers = 2;
    let sim = Simulator::new(config).unwrap();
    let x: address = 0x3000;

    // three sharers exceed the two tracked by hardware
    for tile in [0, 1, 2] {
        let _ = sim.load(tile, Context::Main, x, 4);
    }
    sim.quiesce();
    let entry = sim.tile(0).directory_entry(x).unwrap();
    assert_eq!(entry.state, DirectoryState::SHARED);
    assert!(entry.in_broadcast_mode());

    // the write must now invalidate every tile, not just the tracked two
    sim.store(3, Context::Main, x, &1u32.to_le_bytes());
    sim.quiesce();

    for tile in [0, 1, 2] {
        assert_eq!(sim.tile(tile).l2_state(x), None, "tile {tile} kept a stale copy");
    }
    let entry = sim.tile(0).directory_entry(x).unwrap();
    assert_eq!(entry.state, DirectoryState::MODIFIED);
    assert_eq!(entry.owner, Some(3));
    assert!(!entry.in_broadcast_mode());

    let stats = sim.stats();
    let directory = stats.tiles[0].directory.as_ref().unwrap();
    assert!(directory.sharer_overflows >= 1);
    assert!(directory.broadcasts >= 1);
}

/// At most one tile holds a block MODIFIED, checked between rounds of
/// randomly interleaved reads and writes from every tile.
#[test]
fn at_most_one_owner_under_random_interleavings() {
    let num_tiles = 4;
    let sim = Simulator::new(small_config(num_tiles)).unwrap();
    let addrs: Vec<address> = vec![0x4000, 0x4040];

    let mut rng = StdRng::seed_from_u64(0xcafe);
    for round in 0..50 {
        let seeds: Vec<u64> = (0..num_tiles).map(|_| rng.gen()).collect();
        std::thread::scope(|scope| {
            for (tile, seed) in seeds.iter().copied().enumerate() {
                let sim = &sim;
                let addrs = &addrs;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..4 {
                        let addr = addrs[rng.gen_range(0..addrs.len())];
                        if rng.gen_bool(0.5) {
                            let value = (tile as u32) << 16 | rng.gen_range(0..0x10000);
                            sim.store(tile, Context::Main, addr, &value.to_le_bytes());
                        } else {
                            let _ = sim.load(tile, Context::Main, addr, 4);
                        }
                    }
                });
            }
        });
        sim.quiesce();

        for &addr in &addrs {
            let owners: Vec<TileId> = (0..num_tiles)
                .filter(|&tile| sim.tile(tile).l2_state(addr) == Some(State::MODIFIED))
                .collect();
            assert!(
                owners.len() <= 1,
                "round {round}: {addr:#x} modified at tiles {owners:?}"
            );
            let entry = sim.tile(0).directory_entry(addr);
            match owners.first() {
                Some(&owner) => {
                    let entry = entry.expect("owned block has a directory entry");
                    assert_eq!(entry.state, DirectoryState::MODIFIED);
                    assert_eq!(entry.owner, Some(owner));
                    // exclusivity: nobody else holds any copy
                    for tile in 0..num_tiles {
                        if tile != owner {
                            assert_eq!(sim.tile(tile).l2_state(addr), None);
                        }
                    }
                }
                None => {
                    if let Some(entry) = entry {
                        assert_ne!(
                            entry.state,
                            DirectoryState::MODIFIED,
                            "round {round}: directory thinks {addr:#x} is owned but no tile does"
                        );
                    }
                }
            }
        }
    }

    // every surviving value was written by somebody
    for &addr in &addrs {
        let value = as_u32(&sim.load(0, Context::Main, addr, 4));
        if value != 0 {
            let tile = (value >> 16) as usize;
            assert!(tile < num_tiles, "{addr:#x} holds {value:#x}, written by nobody");
        }
    }
}

/// A burst of conflicting writes to one block completes strictly
/// serialized: every write observes a consistent ownership handoff and the
/// final state is a single owner.
#[test]
fn conflicting_writes_serialize_per_address() {
    let num_tiles = 4;
    let sim = Simulator::new(small_config(num_tiles)).unwrap();
    let x: address = 0x5000;

    std::thread::scope(|scope| {
        for tile in 0..num_tiles {
            let sim = &sim;
            scope.spawn(move || {
                for i in 0..8u32 {
                    sim.store(tile, Context::Main, x, &((tile as u32) << 8 | i).to_le_bytes());
                }
            });
        }
    });
    sim.quiesce();

    let owners: Vec<TileId> = (0..num_tiles)
        .filter(|&tile| sim.tile(tile).l2_state(x) == Some(State::MODIFIED))
        .collect();
    assert_eq!(owners.len(), 1);
    let entry = sim.tile(0).directory_entry(x).unwrap();
    assert_eq!(entry.state, DirectoryState::MODIFIED);
    assert_eq!(entry.owner, Some(owners[0]));

    // the surviving value is the owner's last write
    let value = as_u32(&sim.tile(owners[0]).l2_block(x).unwrap()[..4]);
    assert_eq!(value, (owners[0] as u32) << 8 | 7);
}

/// Dirty L2 evictions write their data back to the home before the slot
/// is reused, and clean evictions notify the directory.
#[test]
fn capacity_evictions_write_back_dirty_blocks() {
    let mut config = small_config(2);
    // two-set, two-way L2 so three same-set blocks force an eviction
    config.l2_cache = CacheConfig {
        cache_size: 256,
        associativity: 2,
        replacement_policy: ReplacementPolicy::LRU,
        access_time: 4,
    };
    config.l1_icache.cache_size = 256;
    config.l1_dcache.cache_size = 256;
    config.l1_icache.associativity = 2;
    config.l1_dcache.associativity = 2;
    let sim = Simulator::new(config).unwrap();

    // same L2 set: stride = num_sets * block = 2 * 64
    let a: address = 0x000;
    let b: address = 0x080;
    let c: address = 0x100;
    sim.store(1, Context::Main, a, &0x11111111u32.to_le_bytes());
    sim.store(1, Context::Main, b, &0x22222222u32.to_le_bytes());
    sim.store(1, Context::Main, c, &0x33333333u32.to_le_bytes());
    sim.quiesce();

    // the least recently used block left the tile and its data reached
    // the backing store
    assert_eq!(sim.tile(1).l2_state(a), None);
    let dram = sim.tile(0).dram_block(a).unwrap();
    assert_eq!(as_u32(&dram[..4]), 0x11111111);
    let entry = sim.tile(0).directory_entry(a).unwrap();
    assert_eq!(entry.state, DirectoryState::UNCACHED);
    assert_eq!(entry.owner, None);

    // reading it again round-trips through DRAM
    assert_eq!(as_u32(&sim.load(1, Context::Main, a, 4)), 0x11111111);

    let stats = sim.stats();
    assert!(stats.tiles[1].l2.evictions >= 1);
    assert!(stats.tiles[1].l2.writebacks >= 1);
}

/// Filling a full directory set nullifies the LRU entry: its sharers are
/// invalidated before the slot is reused.
#[test]
fn directory_eviction_invalidates_sharers_first() {
    let mut config = small_config(2);
    config.directory.total_entries = 2;
    config.directory.associativity = 2;
    let sim = Simulator::new(config).unwrap();

    let a: address = 0x000;
    let b: address = 0x040;
    let c: address = 0x080;
    assert_eq!(as_u32(&sim.load(1, Context::Main, a, 4)), 0);
    let _ = sim.load(1, Context::Main, b, 4);
    sim.quiesce();
    assert_eq!(sim.tile(1).l2_state(a), Some(State::SHARED));

    // the single set is full; tracking C evicts the oldest entry A
    let _ = sim.load(1, Context::Main, c, 4);
    sim.quiesce();

    assert!(sim.tile(0).directory_entry(c).is_some());
    assert!(sim.tile(0).directory_entry(a).is_none());
    // the nullify round dropped tile 1's copy of A
    assert_eq!(sim.tile(1).l2_state(a), None);

    let stats = sim.stats();
    let directory = stats.tiles[0].directory.as_ref().unwrap();
    assert!(directory.evictions >= 1);

    // A is still readable afterwards
    assert_eq!(as_u32(&sim.load(1, Context::Main, a, 4)), 0);
}

/// Both logical contexts of a tile share one L2 and one coherence view.
#[test]
fn companion_context_is_coherence_symmetric() {
    let sim = Simulator::new(small_config(2)).unwrap();
    let x: address = 0x6000;

    sim.store(1, Context::Main, x, &42u32.to_le_bytes());
    // the companion context hits the shared L2, not the network
    assert_eq!(as_u32(&sim.load(1, Context::Companion, x, 4)), 42);
    sim.quiesce();

    let stats = sim.stats();
    assert_eq!(stats.tiles[1].companion_l1d.misses, 1);
    assert_eq!(stats.tiles[1].companion_l1d.fills, 1);
    // exactly one coherence transaction reached the directory
    assert_eq!(stats.tiles[0].directory.as_ref().unwrap().requests, 1);

    // a remote write invalidates both contexts' L1 copies
    sim.store(0, Context::Main, x, &43u32.to_le_bytes());
    sim.quiesce();
    assert_eq!(sim.tile(1).l2_state(x), None);
    assert_eq!(as_u32(&sim.load(1, Context::Companion, x, 4)), 43);
}

#[test]
fn instruction_fetches_use_the_instruction_cache() {
    let sim = Simulator::new(small_config(2)).unwrap();
    let pc: address = 0x7000;

    let _ = sim.instruction_fetch(1, Context::Main, pc, 8);
    let _ = sim.instruction_fetch(1, Context::Main, pc, 8);
    sim.quiesce();

    let stats = sim.stats();
    assert_eq!(stats.tiles[1].l1i.accesses, 2);
    assert_eq!(stats.tiles[1].l1i.hits, 1);
    assert_eq!(stats.tiles[1].l1d.accesses, 0);
}

#[test]
fn deterministic_counters_for_a_repeated_load() {
    use pretty_assertions_sorted::assert_eq;

    let sim = Simulator::new(small_config(2)).unwrap();
    let x: address = 0x8000;
    let _ = sim.load(1, Context::Main, x, 4);
    let _ = sim.load(1, Context::Main, x, 4);
    sim.quiesce();

    let stats = sim.stats();
    assert_eq!(
        stats.tiles[1].l1d,
        stats::Cache {
            accesses: 2,
            hits: 1,
            misses: 1,
            evictions: 0,
            insertions: 1,
            fills: 1,
            writebacks: 0,
        }
    );
    assert_eq!(
        stats.tiles[1].l2,
        stats::Cache {
            accesses: 2,
            hits: 1,
            misses: 1,
            evictions: 0,
            insertions: 1,
            fills: 1,
            writebacks: 0,
        }
    );
    assert_eq!(stats.tiles[0].dram.as_ref().unwrap().reads, 1);
}

#[test]
fn disabled_models_exclude_warmup_from_counters() {
    let sim = Simulator::new(small_config(2)).unwrap();
    sim.disable_models();
    let x: address = 0x9000;
    let _ = sim.load(1, Context::Main, x, 4);
    sim.quiesce();
    let stats = sim.stats();
    assert_eq!(stats.tiles[1].l1d.accesses, 0);
    assert_eq!(stats.tiles[1].l2.accesses, 0);
    assert_eq!(stats.tiles[0].dram.as_ref().unwrap().reads, 0);

    sim.enable_models();
    let _ = sim.load(1, Context::Main, x, 4);
    sim.quiesce();
    let stats = sim.stats();
    assert_eq!(stats.tiles[1].l1d.accesses, 1);
    assert_eq!(stats.tiles[1].l1d.hits, 1);
}
