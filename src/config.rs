use crate::TileId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration the memory system cannot be constructed from.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{component}: {reason}")]
    Invalid { component: String, reason: String },
}

impl ConfigError {
    fn invalid(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// A cache replacement policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplacementPolicy {
    #[default]
    LRU, // L
    FIFO, // F
}

/// Geometry and timing of one cache instance. The block size is global to
/// the memory system and passed in separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total capacity in bytes.
    pub cache_size: u32,
    pub associativity: usize,
    #[serde(default)]
    pub replacement_policy: ReplacementPolicy,
    /// Cycles per lookup.
    pub access_time: u64,
}

impl CacheConfig {
    #[must_use]
    pub fn num_sets(&self, block_size: u32) -> usize {
        self.cache_size as usize / block_size as usize / self.associativity
    }

    #[must_use]
    pub fn describe(&self, block_size: u32) -> String {
        format!(
            "{} ({} sets, {}-way, {} byte line)",
            human_bytes::human_bytes(f64::from(self.cache_size)),
            self.num_sets(block_size),
            self.associativity,
            block_size
        )
    }

    fn validate(&self, component: &str, block_size: u32) -> Result<(), ConfigError> {
        if self.associativity == 0 {
            return Err(ConfigError::invalid(component, "associativity must be at least 1"));
        }
        let line_bytes = block_size as usize * self.associativity;
        if self.cache_size == 0 || self.cache_size as usize % line_bytes != 0 {
            return Err(ConfigError::invalid(
                component,
                format!(
                    "cache_size {} is not a multiple of associativity x block size ({line_bytes})",
                    self.cache_size
                ),
            ));
        }
        if !self.num_sets(block_size).is_power_of_two() {
            return Err(ConfigError::invalid(
                component,
                format!("number of sets {} must be a power of two", self.num_sets(block_size)),
            ));
        }
        Ok(())
    }
}

/// Geometry of one home-directory cache plus its sharer-tracking limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub total_entries: usize,
    pub associativity: usize,
    /// Sharers tracked precisely per entry before it degrades to
    /// broadcast mode.
    pub max_hw_sharers: usize,
    /// Right-shift applied to an address before hashing it to a home tile.
    pub home_lookup_param: u32,
    /// Cycles per lookup.
    pub access_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DramConfig {
    /// Flat per-access latency in cycles.
    pub latency: u64,
}

/// Construction-time description of the whole memory system. Values are
/// read once; there is no hot reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub num_tiles: usize,
    pub block_size: u32,
    /// Tiles hosting a memory controller (directory and DRAM). Empty means
    /// every tile hosts one.
    #[serde(default)]
    pub memory_controller_tiles: Vec<TileId>,
    pub l1_icache: CacheConfig,
    pub l1_dcache: CacheConfig,
    pub l2_cache: CacheConfig,
    pub directory: DirectoryConfig,
    pub dram: DramConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            num_tiles: 4,
            block_size: 64,
            memory_controller_tiles: vec![],
            l1_icache: CacheConfig {
                cache_size: 4096,
                associativity: 4,
                replacement_policy: ReplacementPolicy::LRU,
                access_time: 1,
            },
            l1_dcache: CacheConfig {
                cache_size: 4096,
                associativity: 4,
                replacement_policy: ReplacementPolicy::LRU,
                access_time: 1,
            },
            l2_cache: CacheConfig {
                cache_size: 32768,
                associativity: 8,
                replacement_policy: ReplacementPolicy::LRU,
                access_time: 6,
            },
            directory: DirectoryConfig {
                total_entries: 512,
                associativity: 8,
                max_hw_sharers: 16,
                home_lookup_param: 6,
                access_time: 2,
            },
            dram: DramConfig { latency: 100 },
        }
    }
}

impl MemoryConfig {
    /// Tiles the directory state is sharded over.
    #[must_use]
    pub fn home_tiles(&self) -> Vec<TileId> {
        if self.memory_controller_tiles.is_empty() {
            (0..self.num_tiles).collect()
        } else {
            self.memory_controller_tiles.clone()
        }
    }

    #[must_use]
    pub fn has_memory_controller(&self, tile_id: TileId) -> bool {
        self.home_tiles().contains(&tile_id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_tiles == 0 {
            return Err(ConfigError::invalid("system", "num_tiles must be at least 1"));
        }
        if !self.block_size.is_power_of_two() {
            return Err(ConfigError::invalid(
                "system",
                format!("block_size {} must be a power of two", self.block_size),
            ));
        }
        self.l1_icache.validate("l1_icache", self.block_size)?;
        self.l1_dcache.validate("l1_dcache", self.block_size)?;
        self.l2_cache.validate("l2_cache", self.block_size)?;
        if self.directory.associativity == 0
            || self.directory.total_entries == 0
            || self.directory.total_entries % self.directory.associativity != 0
        {
            return Err(ConfigError::invalid(
                "directory",
                format!(
                    "total_entries {} must be a non-zero multiple of associativity {}",
                    self.directory.total_entries, self.directory.associativity
                ),
            ));
        }
        if self.directory.max_hw_sharers == 0 {
            return Err(ConfigError::invalid("directory", "max_hw_sharers must be at least 1"));
        }
        for &tile in &self.memory_controller_tiles {
            if tile >= self.num_tiles {
                return Err(ConfigError::invalid(
                    "system",
                    format!("memory controller tile {tile} does not exist (num_tiles {})", self.num_tiles),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        MemoryConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_sets() {
        let mut config = MemoryConfig::default();
        config.l2_cache.cache_size = 3 * 64 * 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_memory_controller() {
        let mut config = MemoryConfig::default();
        config.memory_controller_tiles = vec![7];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_hw_sharers() {
        let mut config = MemoryConfig::default();
        config.directory.max_hw_sharers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn home_tiles_default_to_all() {
        let config = MemoryConfig::default();
        assert_eq!(config.home_tiles(), vec![0, 1, 2, 3]);
        assert!(config.has_memory_controller(3));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: MemoryConfig = serde_json::from_str(
            r#"{
                "num_tiles": 2,
                "block_size": 32,
                "l1_icache": {"cache_size": 1024, "associativity": 2, "access_time": 1},
                "l1_dcache": {"cache_size": 1024, "associativity": 2, "access_time": 1},
                "l2_cache": {"cache_size": 8192, "associativity": 4, "access_time": 4},
                "directory": {"total_entries": 64, "associativity": 4, "max_hw_sharers": 4, "home_lookup_param": 5, "access_time": 2},
                "dram": {"latency": 50}
            }"#,
        )
        .unwrap();
        assert_eq!(config.l1_icache.replacement_policy, ReplacementPolicy::LRU);
        config.validate().unwrap();
    }
}
