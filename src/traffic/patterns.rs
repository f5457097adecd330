use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mem::request::AccessKind;
use crate::traffic::config::{TrafficConfig, TrafficPatternSpec};

/// One request worth of traffic: where and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficOp {
    pub addr: u64,
    pub kind: AccessKind,
}

#[derive(Debug, Clone, Copy)]
enum PatternKind {
    Sequential,
    Strided { stride: u64 },
    Random { slots: u64 },
}

#[derive(Debug)]
pub struct PatternEngine {
    pub name: String,
    kind: PatternKind,
    base: u64,
    req_bytes: u64,
    footprint: u64,
    read_fraction: f64,
    index: u64,
    addr_rng: StdRng,
    op_rng: StdRng,
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig) -> anyhow::Result<Self> {
        compile_pattern(&config.pattern, config.base).context("[traffic.pattern]")
    }

    /// Requests generated so far.
    pub fn generated(&self) -> u64 {
        self.index
    }

    pub fn next_op(&mut self) -> TrafficOp {
        let offset = match self.kind {
            PatternKind::Sequential => (self.index * self.req_bytes) % self.footprint,
            PatternKind::Strided { stride } => {
                let offset = self.index.wrapping_mul(stride) % self.footprint;
                offset - offset % self.req_bytes
            }
            PatternKind::Random { slots } => self.addr_rng.gen_range(0..slots) * self.req_bytes,
        };
        self.index += 1;
        let kind = if self.op_rng.gen::<f64>() < self.read_fraction {
            AccessKind::Read
        } else {
            AccessKind::Write
        };
        TrafficOp {
            addr: self.base + offset,
            kind,
        }
    }
}

fn compile_pattern(spec: &TrafficPatternSpec, base: u64) -> anyhow::Result<PatternEngine> {
    spec.validate()?;
    let kind = match spec.kind.trim().to_ascii_lowercase().as_str() {
        "sequential" | "seq" => PatternKind::Sequential,
        "strided" => PatternKind::Strided {
            stride: spec.stride.max(spec.req_bytes),
        },
        "random" => PatternKind::Random {
            slots: (spec.footprint / spec.req_bytes).max(1),
        },
        other => bail!(
            "unsupported traffic pattern kind '{}' (expected sequential|strided|random)",
            other
        ),
    };
    let name = if spec.name.is_empty() {
        default_pattern_name(&kind, spec)
    } else {
        spec.name.clone()
    };
    Ok(PatternEngine {
        name,
        kind,
        base,
        req_bytes: spec.req_bytes,
        footprint: spec.footprint,
        read_fraction: spec.read_fraction,
        index: 0,
        addr_rng: StdRng::seed_from_u64(spec.seed),
        op_rng: StdRng::seed_from_u64(spec.seed ^ 0x9e37_79b9_7f4a_7c15),
    })
}

fn default_pattern_name(kind: &PatternKind, spec: &TrafficPatternSpec) -> String {
    match kind {
        PatternKind::Sequential => format!("sequential@{}", spec.req_bytes),
        PatternKind::Strided { stride } => format!("strided({})@{}", stride, spec.req_bytes),
        PatternKind::Random { .. } => format!("random({})@{}", spec.seed, spec.req_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str) -> TrafficConfig {
        TrafficConfig {
            base: 0x1000,
            pattern: TrafficPatternSpec {
                kind: kind.to_string(),
                req_bytes: 64,
                stride: 256,
                footprint: 1024,
                read_fraction: 1.0,
                seed: 3,
                ..TrafficPatternSpec::default()
            },
            ..TrafficConfig::default()
        }
    }

    #[test]
    fn sequential_walks_the_footprint_and_wraps() {
        let mut engine = PatternEngine::new(&config("sequential")).unwrap();
        let addrs: Vec<u64> = (0..17).map(|_| engine.next_op().addr).collect();
        assert_eq!(0x1000, addrs[0]);
        assert_eq!(0x1040, addrs[1]);
        assert_eq!(0x1000, addrs[16]);
        assert_eq!(17, engine.generated());
        assert_eq!("sequential@64", engine.name);
    }

    #[test]
    fn strided_steps_by_stride() {
        let mut engine = PatternEngine::new(&config("strided")).unwrap();
        let addrs: Vec<u64> = (0..5).map(|_| engine.next_op().addr).collect();
        assert_eq!(vec![0x1000, 0x1100, 0x1200, 0x1300, 0x1000], addrs);
    }

    #[test]
    fn random_stream_is_deterministic_and_bounded() {
        let mut a = PatternEngine::new(&config("random")).unwrap();
        let mut b = PatternEngine::new(&config("random")).unwrap();
        for _ in 0..100 {
            let op = a.next_op();
            assert_eq!(op, b.next_op());
            assert!((0x1000..0x1400).contains(&op.addr));
            assert_eq!(0, op.addr % 64);
        }
    }

    #[test]
    fn read_fraction_selects_access_kind() {
        let mut cfg = config("sequential");
        cfg.pattern.read_fraction = 0.0;
        let mut engine = PatternEngine::new(&cfg).unwrap();
        assert!((0..10).all(|_| engine.next_op().kind == AccessKind::Write));
        let mut engine = PatternEngine::new(&config("sequential")).unwrap();
        assert!((0..10).all(|_| engine.next_op().kind == AccessKind::Read));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let err = PatternEngine::new(&config("zigzag")).unwrap_err();
        assert!(format!("{:#}", err).contains("unsupported traffic pattern kind 'zigzag'"));
    }
}
