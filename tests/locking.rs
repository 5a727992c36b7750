use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tilecachesim::cache::State;
use tilecachesim::config::MemoryConfig;
use tilecachesim::sim::Simulator;
use tilecachesim::{address, Context};

fn as_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().unwrap())
}

/// Atomic read-modify-write sequences from both logical contexts of one
/// tile never interleave: every increment survives.
#[test]
fn locked_sequences_are_indivisible_across_contexts() {
    let sim = Simulator::new(MemoryConfig::default()).unwrap();
    let counter: address = 0x1000;
    let rounds = 100u32;

    std::thread::scope(|scope| {
        for ctx in [Context::Main, Context::Companion] {
            let sim = &sim;
            scope.spawn(move || {
                for _ in 0..rounds {
                    let value = as_u32(&sim.load_locked(0, ctx, counter, 4));
                    sim.store_unlocked(0, ctx, counter, &(value + 1).to_le_bytes());
                }
            });
        }
    });
    sim.quiesce();

    assert_eq!(as_u32(&sim.load(0, Context::Main, counter, 4)), 2 * rounds);
    // the read-for-exclusive half left the tile owning the block
    assert_eq!(sim.tile(0).l2_state(counter), Some(State::MODIFIED));
}

#[test]
fn token_is_held_between_lock_and_unlock() {
    let sim = Simulator::new(MemoryConfig::default()).unwrap();
    let x: address = 0x2000;

    assert_eq!(sim.tile(0).token_holder(), None);
    let _ = sim.load_locked(0, Context::Companion, x, 4);
    assert_eq!(sim.tile(0).token_holder(), Some(Context::Companion));
    sim.store_unlocked(0, Context::Companion, x, &1u32.to_le_bytes());
    assert_eq!(sim.tile(0).token_holder(), None);
}

/// While a locked sequence holds the token, the sibling context makes no
/// progress at all, even on unrelated addresses.
#[test]
fn locked_sequence_blocks_the_sibling_context() {
    let sim = Simulator::new(MemoryConfig::default()).unwrap();
    let x: address = 0x3000;
    let y: address = 0x4000;
    let sibling_done = AtomicBool::new(false);

    // the locked read misses all the way to DRAM and returns with the
    // token still held
    let _ = sim.load_locked(0, Context::Main, x, 4);
    assert_eq!(sim.tile(0).token_holder(), Some(Context::Main));

    std::thread::scope(|scope| {
        let sim = &sim;
        let sibling_done = &sibling_done;
        scope.spawn(move || {
            // an unrelated address: blocked by the token, not the protocol
            let _ = sim.load(0, Context::Companion, y, 4);
            sibling_done.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert!(
            !sibling_done.load(Ordering::SeqCst),
            "companion made progress while main held the token"
        );

        sim.store_unlocked(0, Context::Main, x, &9u32.to_le_bytes());
    });
    assert!(sibling_done.load(Ordering::SeqCst));
}

#[test]
#[should_panic(expected = "UNLOCK without a pending locked sequence")]
fn unlock_without_lock_is_fatal() {
    let sim = Simulator::new(MemoryConfig::default()).unwrap();
    sim.store_unlocked(0, Context::Main, 0x5000, &1u32.to_le_bytes());
}

#[test]
#[should_panic(expected = "already holds")]
fn double_lock_is_fatal() {
    let sim = Simulator::new(MemoryConfig::default()).unwrap();
    let _ = sim.load_locked(0, Context::Main, 0x6000, 4);
    let _ = sim.load_locked(0, Context::Main, 0x6040, 4);
}
