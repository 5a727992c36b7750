use crate::{address, TileId};
use bitvec::vec::BitVec;

/// Directory state of a block at its home tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DirectoryState {
    UNCACHED,
    SHARED,
    MODIFIED,
}

/// Sharer tracking for one block.
///
/// At most `max_hw_sharers` tiles are tracked precisely; past that the
/// entry degrades to broadcast mode, where the sharer set is unknown and
/// invalidations must reach every tile. A full invalidation round restores
/// precise tracking.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub addr: address,
    pub state: DirectoryState,
    pub owner: Option<TileId>,
    sharers: BitVec,
    broadcast_mode: bool,
    max_hw_sharers: usize,
}

impl DirectoryEntry {
    #[must_use]
    pub fn new(addr: address, num_tiles: usize, max_hw_sharers: usize) -> Self {
        Self {
            addr,
            state: DirectoryState::UNCACHED,
            owner: None,
            sharers: BitVec::repeat(false, num_tiles),
            broadcast_mode: false,
            max_hw_sharers,
        }
    }

    /// Track a new sharer. Returns whether the entry just degraded to
    /// broadcast mode because the hardware limit would be exceeded.
    pub fn add_sharer(&mut self, tile: TileId) -> bool {
        if self.broadcast_mode || self.sharers[tile] {
            return false;
        }
        if self.num_sharers() >= self.max_hw_sharers {
            self.broadcast_mode = true;
            return true;
        }
        self.sharers.set(tile, true);
        false
    }

    pub fn remove_sharer(&mut self, tile: TileId) {
        if !self.broadcast_mode {
            self.sharers.set(tile, false);
        }
    }

    /// Tracked sharers; meaningless while in broadcast mode.
    #[must_use]
    pub fn sharers(&self) -> Vec<TileId> {
        self.sharers.iter_ones().collect()
    }

    #[must_use]
    pub fn num_sharers(&self) -> usize {
        self.sharers.count_ones()
    }

    #[must_use]
    pub fn is_sharer(&self, tile: TileId) -> bool {
        !self.broadcast_mode && self.sharers[tile]
    }

    #[must_use]
    pub fn in_broadcast_mode(&self) -> bool {
        self.broadcast_mode
    }

    /// Forget all sharers; also restores precise tracking after a
    /// broadcast invalidation round.
    pub fn clear_sharers(&mut self) {
        self.sharers.fill(false);
        self.broadcast_mode = false;
    }
}

#[cfg(test)]
mod tests {
    use super::{DirectoryEntry, DirectoryState};

    #[test]
    fn sharer_overflow_degrades_to_broadcast() {
        let mut entry = DirectoryEntry::new(0x40, 8, 2);
        assert!(!entry.add_sharer(0));
        assert!(!entry.add_sharer(1));
        assert!(!entry.in_broadcast_mode());
        assert_eq!(entry.sharers(), vec![0, 1]);

        // third sharer exceeds the hardware limit
        assert!(entry.add_sharer(2));
        assert!(entry.in_broadcast_mode());

        // further membership updates are no-ops while imprecise
        assert!(!entry.add_sharer(3));
        entry.remove_sharer(0);
        assert!(entry.in_broadcast_mode());
    }

    #[test]
    fn clearing_restores_precise_tracking() {
        let mut entry = DirectoryEntry::new(0x40, 4, 1);
        entry.add_sharer(0);
        entry.add_sharer(1);
        assert!(entry.in_broadcast_mode());
        entry.clear_sharers();
        assert!(!entry.in_broadcast_mode());
        assert_eq!(entry.num_sharers(), 0);
        assert!(!entry.add_sharer(3));
        assert_eq!(entry.sharers(), vec![3]);
    }

    #[test]
    fn re_adding_a_sharer_does_not_overflow() {
        let mut entry = DirectoryEntry::new(0x40, 4, 2);
        entry.add_sharer(0);
        entry.add_sharer(1);
        assert!(!entry.add_sharer(1));
        assert!(!entry.in_broadcast_mode());
        assert_eq!(entry.state, DirectoryState::UNCACHED);
    }
}
