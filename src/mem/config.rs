use anyhow::Context;
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::sim::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowBufferPolicy {
    #[default]
    OpenPage,
    ClosePage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    /// Consecutive blocks fill a row, then move across banks and ranks.
    #[default]
    RowRankBankCol,
    /// Consecutive blocks fill a whole bank before moving on.
    RankBankRowCol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    #[default]
    Lru,
    Fifo,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub name: String,
    pub row_buffer_policy: RowBufferPolicy,
    pub mapping: MappingKind,
    /// One queue shared by all banks instead of one queue per bank.
    pub global_queue: bool,
    /// Capacity of the global queue, or of each bank queue.
    pub max_queue_size: usize,
    pub num_ranks: u64,
    pub banks_per_rank: u64,
    pub rows_per_bank: u64,
    pub blocks_per_row: u64,
    pub block_size: u64,
    pub open_latency: u64,
    pub close_latency: u64,
    pub access_latency: u64,
    /// Close-page only: pay the close latency on the critical path.
    pub long_close_latency: bool,
    pub bus_latency: u64,
    /// First address served by this device.
    pub offset: u64,
    /// Timestamp from which per-request debug tracing is logged.
    pub debug_start: Option<u64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::dram()
    }
}

impl MemoryConfig {
    pub fn dram() -> Self {
        let s = Self {
            name: "dram".to_string(),
            row_buffer_policy: RowBufferPolicy::OpenPage,
            mapping: MappingKind::RowRankBankCol,
            global_queue: false,
            max_queue_size: 32,
            num_ranks: 1,
            banks_per_rank: 8,
            rows_per_bank: 1024,
            blocks_per_row: 32,
            block_size: 64,
            open_latency: 15,
            close_latency: 15,
            access_latency: 15,
            long_close_latency: false,
            bus_latency: 4,
            offset: 0,
            debug_start: None,
        };
        s.ensure_valid();
        s
    }

    pub fn pcm() -> Self {
        let s = Self {
            name: "pcm".to_string(),
            row_buffer_policy: RowBufferPolicy::OpenPage,
            mapping: MappingKind::RowRankBankCol,
            global_queue: false,
            max_queue_size: 32,
            num_ranks: 1,
            banks_per_rank: 8,
            rows_per_bank: 16384,
            blocks_per_row: 32,
            block_size: 64,
            open_latency: 60,
            close_latency: 150,
            access_latency: 15,
            long_close_latency: false,
            bus_latency: 4,
            offset: 0,
            debug_start: None,
        };
        s.ensure_valid();
        s
    }

    /// Apply the keys present in `section` on top of `base`.
    pub fn overlay(base: Self, section: Option<&Value>) -> anyhow::Result<Self> {
        let Some(section) = section else {
            return Ok(base);
        };
        let mut merged = Value::try_from(&base).context("cannot serialize base memory config")?;
        match (&mut merged, section) {
            (Value::Table(merged), Value::Table(section)) => {
                for (key, value) in section {
                    merged.insert(key.clone(), value.clone());
                }
            }
            _ => anyhow::bail!("memory config section must be a table"),
        }
        merged
            .try_into()
            .context("cannot deserialize memory config section")
    }

    pub fn total_size(&self) -> u64 {
        self.num_ranks * self.banks_per_rank * self.rows_per_bank * self.blocks_per_row * self.block_size
    }

    pub fn num_banks(&self) -> usize {
        (self.num_ranks * self.banks_per_rank) as usize
    }

    pub fn ensure_valid(&self) {
        assert!(self.max_queue_size > 0, "{}: max_queue_size must be > 0", self.name);
        assert!(self.num_ranks > 0, "{}: num_ranks must be > 0", self.name);
        assert!(self.banks_per_rank > 0, "{}: banks_per_rank must be > 0", self.name);
        assert!(self.rows_per_bank > 0, "{}: rows_per_bank must be > 0", self.name);
        assert!(self.blocks_per_row > 0, "{}: blocks_per_row must be > 0", self.name);
        assert!(
            self.block_size.is_power_of_two(),
            "{}: block_size must be a power of two",
            self.name
        );
        assert!(
            self.offset % self.block_size == 0,
            "{}: offset must be block aligned",
            self.name
        );
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub name: String,
    pub block_size: u64,
    pub set_assoc: usize,
    pub replacement: ReplacementPolicy,
    /// Size of the region a trace or workload treats as a page; blocks never straddle it.
    pub page_size: u64,
    /// Tag array access latency.
    pub penalty: u64,
    pub max_queue_size: usize,
    /// Granularity of the sub-accesses issued to either tier.
    pub small_block_size: u64,
    pub seed: u64,
    pub debug_start: Option<u64>,
}

impl Config for CacheConfig {}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            block_size: 256,
            set_assoc: 8,
            replacement: ReplacementPolicy::Lru,
            page_size: 4096,
            penalty: 10,
            max_queue_size: 64,
            small_block_size: 64,
            seed: 0,
            debug_start: None,
        }
    }
}

impl CacheConfig {
    pub fn num_sets(&self, fast_tier: &MemoryConfig) -> usize {
        (fast_tier.total_size() / (self.block_size * self.set_assoc as u64)) as usize
    }

    pub fn ensure_valid(&self, fast_tier: &MemoryConfig, slow_tier: &MemoryConfig) {
        assert!(self.block_size.is_power_of_two(), "cache block_size must be a power of two");
        assert!(
            self.small_block_size.is_power_of_two(),
            "small_block_size must be a power of two"
        );
        assert!(
            self.small_block_size <= self.block_size,
            "small_block_size must not exceed block_size"
        );
        assert!(
            self.page_size >= self.block_size && self.page_size % self.block_size == 0,
            "page_size must be a multiple of block_size"
        );
        assert!(self.set_assoc > 0, "set_assoc must be > 0");
        assert!(self.max_queue_size > 0, "cache max_queue_size must be > 0");
        assert!(
            self.num_sets(fast_tier) > 0,
            "fast tier is too small for a single cache set"
        );
        // cache blocks are carved out of slow-tier addresses
        assert!(
            slow_tier.offset % self.block_size == 0,
            "{}: offset must be a multiple of the cache block_size {}",
            slow_tier.name,
            self.block_size
        );
        assert!(
            slow_tier.total_size() % self.block_size == 0,
            "{}: size must be a multiple of the cache block_size {}",
            slow_tier.name,
            self.block_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_form_a_valid_cache() {
        CacheConfig::default().ensure_valid(&MemoryConfig::dram(), &MemoryConfig::pcm());
    }

    #[test]
    #[should_panic(expected = "offset must be a multiple of the cache block_size")]
    fn slow_tier_offset_inside_a_cache_block_aborts() {
        let pcm = MemoryConfig {
            offset: 64,
            ..MemoryConfig::pcm()
        };
        CacheConfig::default().ensure_valid(&MemoryConfig::dram(), &pcm);
    }

    #[test]
    #[should_panic(expected = "size must be a multiple of the cache block_size")]
    fn slow_tier_size_not_whole_cache_blocks_aborts() {
        let pcm = MemoryConfig {
            num_ranks: 1,
            banks_per_rank: 1,
            rows_per_bank: 1,
            blocks_per_row: 3,
            ..MemoryConfig::pcm()
        };
        CacheConfig::default().ensure_valid(&MemoryConfig::dram(), &pcm);
    }

    #[test]
    fn overlay_keeps_unset_fields() {
        let section: toml::Value = toml::from_str("max_queue_size = 4").unwrap();
        let config = MemoryConfig::overlay(MemoryConfig::pcm(), Some(&section)).unwrap();
        assert_eq!(4, config.max_queue_size);
        assert_eq!(MemoryConfig::pcm().rows_per_bank, config.rows_per_bank);
    }
}
