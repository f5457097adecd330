use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::{Table, Value};

use crate::mem::config::{CacheConfig, MemoryConfig};
use crate::traffic::config::TrafficConfig;

/// Which device the driver talks to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    #[default]
    Cache,
    Memory,
    Staller,
}

impl FromStr for RootKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cache" => Ok(Self::Cache),
            "memory" => Ok(Self::Memory),
            "staller" => Ok(Self::Staller),
            _ => Err(format!(
                "unsupported root '{}', expected one of: cache, memory, staller",
                value
            )),
        }
    }
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .context("cannot deserialize config section"),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub root: RootKind,
    /// Latency of the pass-through device when `root = "staller"`.
    pub staller_penalty: u64,
    pub log_level: u64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            root: RootKind::Cache,
            staller_penalty: 100,
            log_level: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Cycles between statistics flushes; 0 disables periodic flushing.
    pub stats_period: u64,
    /// Cycles between progress log lines; 0 disables them.
    pub progress_period: u64,
    pub stats_file: Option<PathBuf>,
}

impl Config for EngineConfig {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stats_period: 0,
            progress_period: 10_000_000,
            stats_file: None,
        }
    }
}

/// Everything needed to build a simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub sim: SimConfig,
    pub engine: EngineConfig,
    pub dram: MemoryConfig,
    pub pcm: MemoryConfig,
    pub cache: CacheConfig,
    pub traffic: TrafficConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sim: SimConfig::default(),
            engine: EngineConfig::default(),
            dram: MemoryConfig::dram(),
            pcm: MemoryConfig::pcm(),
            cache: CacheConfig::default(),
            traffic: TrafficConfig::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let table: Table = toml::from_str(text).context("cannot parse config toml")?;
        let config = Self {
            sim: SimConfig::from_section(table.get("sim")).context("[sim]")?,
            engine: EngineConfig::from_section(table.get("engine")).context("[engine]")?,
            dram: MemoryConfig::overlay(MemoryConfig::dram(), table.get("dram")).context("[dram]")?,
            pcm: MemoryConfig::overlay(MemoryConfig::pcm(), table.get("pcm")).context("[pcm]")?,
            cache: CacheConfig::from_section(table.get("cache")).context("[cache]")?,
            traffic: TrafficConfig::from_section(table.get("traffic")).context("[traffic]")?,
        };
        Ok(config)
    }

    pub fn validate(&self) {
        self.dram.ensure_valid();
        self.pcm.ensure_valid();
        if self.sim.root == RootKind::Cache {
            self.cache.ensure_valid(&self.dram, &self.pcm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::config::RowBufferPolicy;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = SimulatorConfig::from_toml_str("").unwrap();
        assert_eq!(RootKind::Cache, config.sim.root);
        assert_eq!("dram", config.dram.name);
        assert_eq!("pcm", config.pcm.name);
        config.validate();
    }

    #[test]
    fn sections_override_fields() {
        let text = r#"
            [sim]
            root = "memory"

            [engine]
            stats_period = 1000

            [pcm]
            name = "slow"
            row_buffer_policy = "close_page"
            max_queue_size = 4
        "#;
        let config = SimulatorConfig::from_toml_str(text).unwrap();
        assert_eq!(RootKind::Memory, config.sim.root);
        assert_eq!(1000, config.engine.stats_period);
        assert_eq!("slow", config.pcm.name);
        assert_eq!(RowBufferPolicy::ClosePage, config.pcm.row_buffer_policy);
        assert_eq!(4, config.pcm.max_queue_size);
    }

    #[test]
    fn bad_values_are_reported() {
        let err = SimulatorConfig::from_toml_str("[sim]\nroot = \"disk\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("[sim]"));
    }

    #[test]
    fn root_kind_parses_from_cli_strings() {
        assert_eq!(Ok(RootKind::Staller), "staller".parse());
        assert!("tape".parse::<RootKind>().is_err());
    }
}
