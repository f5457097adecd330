use std::path::PathBuf;

use anyhow::{ensure, Context};
use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    /// Trace to replay; when set the synthetic pattern is not used.
    pub file: Option<PathBuf>,
    /// Requests to send; 0 replays the whole trace.
    pub num_requests: u64,
    pub max_outstanding: usize,
    /// Minimum cycles between two issued requests.
    pub issue_interval: u64,
    /// Added to every generated address.
    pub base: u64,
    pub pattern: TrafficPatternSpec,
    pub debug_start: Option<u64>,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            file: None,
            num_requests: 10_000,
            max_outstanding: 16,
            issue_interval: 1,
            base: 0,
            pattern: TrafficPatternSpec::default(),
            debug_start: None,
        }
    }
}

impl TrafficConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.max_outstanding > 0, "max_outstanding must be > 0");
        if self.file.is_none() {
            ensure!(
                self.num_requests > 0,
                "synthetic traffic needs num_requests > 0 or a trace file"
            );
            self.pattern.validate().context("[traffic.pattern]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficPatternSpec {
    pub name: String,
    /// sequential | strided | random
    pub kind: String,
    pub req_bytes: u64,
    pub stride: u64,
    /// Bytes covered by the pattern, starting at `base`.
    pub footprint: u64,
    pub read_fraction: f64,
    pub seed: u64,
}

impl Default for TrafficPatternSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "random".to_string(),
            req_bytes: 64,
            stride: 4096,
            footprint: 1 << 20,
            read_fraction: 0.7,
            seed: 0,
        }
    }
}

impl TrafficPatternSpec {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.req_bytes.is_power_of_two(),
            "req_bytes must be a power of two, got {}",
            self.req_bytes
        );
        ensure!(
            self.footprint >= self.req_bytes,
            "footprint must hold at least one request"
        );
        ensure!(
            (0.0..=1.0).contains(&self.read_fraction),
            "read_fraction must be within [0, 1], got {}",
            self.read_fraction
        );
        Ok(())
    }
}
