pub mod cache;
pub mod directory;
pub mod dram;

pub use cache::Cache;
pub use directory::Directory;
pub use dram::Dram;

use serde::{Deserialize, Serialize};

/// Cycle accounting per logical execution context of a tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycles {
    pub main: u64,
    pub companion: u64,
}

impl std::ops::AddAssign for Cycles {
    fn add_assign(&mut self, other: Self) {
        self.main += other.main;
        self.companion += other.companion;
    }
}

/// Counter snapshot for a single tile's memory hierarchy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub l1i: Cache,
    pub l1d: Cache,
    pub companion_l1i: Cache,
    pub companion_l1d: Cache,
    pub l2: Cache,
    pub directory: Option<Directory>,
    pub dram: Option<Dram>,
    pub cycles: Cycles,
}

impl Tile {
    /// Sum of all cache counters on this tile.
    #[must_use]
    pub fn caches_total(&self) -> Cache {
        let mut total = Cache::default();
        total += self.l1i.clone();
        total += self.l1d.clone();
        total += self.companion_l1i.clone();
        total += self.companion_l1d.clone();
        total += self.l2.clone();
        total
    }
}

/// Full simulation snapshot, one entry per tile.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub tiles: Vec<Tile>,
}

impl Stats {
    #[must_use]
    pub fn new(num_tiles: usize) -> Self {
        Self {
            tiles: vec![Tile::default(); num_tiles],
        }
    }

    #[must_use]
    pub fn total_dram(&self) -> Dram {
        let mut total = Dram::default();
        for tile in &self.tiles {
            if let Some(ref dram) = tile.dram {
                total += dram.clone();
            }
        }
        total
    }

    #[must_use]
    pub fn total_directory(&self) -> Directory {
        let mut total = Directory::default();
        for tile in &self.tiles {
            if let Some(ref dir) = tile.directory {
                total += dir.clone();
            }
        }
        total
    }
}
