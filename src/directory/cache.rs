use super::entry::{DirectoryEntry, DirectoryState};
use crate::{address, config};

/// Outcome of asking the directory cache for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// An entry was created; look it up to use it.
    Allocated,
    /// Every way is live: this victim must be nullified (all its sharers
    /// invalidated) before the slot can be reused.
    Evict(address),
    /// Every way belongs to an address with a transaction in flight; retry
    /// once one completes.
    Stall,
}

#[derive(Debug)]
struct Slot {
    entry: DirectoryEntry,
    last_access: u64,
}

/// Set-associative store of directory entries.
///
/// Indexing uses a modulo hash over the block address, so the entry count
/// does not need to be a power of two.
#[derive(Debug)]
pub struct DirectoryCache {
    num_sets: usize,
    associativity: usize,
    max_hw_sharers: usize,
    num_tiles: usize,
    block_size_log2: u32,
    sets: Vec<Vec<Option<Slot>>>,
    time: u64,
}

impl DirectoryCache {
    #[must_use]
    pub fn new(config: &config::DirectoryConfig, num_tiles: usize, block_size: u32) -> Self {
        let num_sets = config.total_entries / config.associativity;
        assert!(num_sets > 0, "directory must have at least one set");
        let sets = (0..num_sets)
            .map(|_| (0..config.associativity).map(|_| None).collect())
            .collect();
        Self {
            num_sets,
            associativity: config.associativity,
            max_hw_sharers: config.max_hw_sharers,
            num_tiles,
            block_size_log2: block_size.trailing_zeros(),
            sets,
            time: 0,
        }
    }

    #[inline]
    fn set_index(&self, addr: address) -> usize {
        ((addr >> self.block_size_log2) as usize) % self.num_sets
    }

    pub fn get_mut(&mut self, addr: address) -> Option<&mut DirectoryEntry> {
        self.time += 1;
        let time = self.time;
        let set_idx = self.set_index(addr);
        self.sets[set_idx]
            .iter_mut()
            .flatten()
            .find(|slot| slot.entry.addr == addr)
            .map(|slot| {
                slot.last_access = time;
                &mut slot.entry
            })
    }

    #[must_use]
    pub fn peek(&self, addr: address) -> Option<&DirectoryEntry> {
        self.sets[self.set_index(addr)]
            .iter()
            .flatten()
            .find(|slot| slot.entry.addr == addr)
            .map(|slot| &slot.entry)
    }

    /// Make room for `addr`: use a free way or reuse an UNCACHED entry,
    /// otherwise name the least recently used victim to nullify first.
    /// `busy` marks addresses with a transaction in flight, which must not
    /// be victimized.
    pub fn allocate(&mut self, addr: address, busy: impl Fn(address) -> bool) -> Allocation {
        self.time += 1;
        let time = self.time;
        let set_idx = self.set_index(addr);
        let set = &mut self.sets[set_idx];
        debug_assert!(
            set.iter().flatten().all(|slot| slot.entry.addr != addr),
            "allocate for {addr:#x} but an entry exists"
        );

        let entry = DirectoryEntry::new(addr, self.num_tiles, self.max_hw_sharers);
        let free = set.iter().position(|slot| {
            slot.as_ref().map_or(true, |slot| {
                slot.entry.state == DirectoryState::UNCACHED && !busy(slot.entry.addr)
            })
        });
        if let Some(way) = free {
            set[way] = Some(Slot {
                entry,
                last_access: time,
            });
            return Allocation::Allocated;
        }

        match set
            .iter()
            .flatten()
            .filter(|slot| !busy(slot.entry.addr))
            .min_by_key(|slot| slot.last_access)
        {
            Some(victim) => Allocation::Evict(victim.entry.addr),
            None => Allocation::Stall,
        }
    }

    pub fn remove(&mut self, addr: address) -> Option<DirectoryEntry> {
        let set_idx = self.set_index(addr);
        let slot = self.sets[set_idx]
            .iter_mut()
            .find(|slot| {
                slot.as_ref()
                    .is_some_and(|slot| slot.entry.addr == addr)
            })?;
        slot.take().map(|slot| slot.entry)
    }

    /// All live entries (inspection).
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.sets
            .iter()
            .flatten()
            .flatten()
            .map(|slot| &slot.entry)
    }
}
