use std::path::Path;

use anyhow::{bail, Context};
use log::{info, warn};
use serde::Serialize;
use serde_json::json;

use crate::mem::cache_memory::{CacheMemory, CacheReport};
use crate::mem::memory::{Memory, MemoryReport};
use crate::mem::request::MemoryRequest;
use crate::mem::staller::Staller;
use crate::mem::stats::MemoryStats;
use crate::mem::traits::MemoryPort;
use crate::sim::config::{RootKind, SimulatorConfig};
use crate::sim::engine::{Engine, EngineStats, Event, EventHandler, HandlerId, JsonLinesSink};
use crate::timeq::Cycle;
use crate::traffic::config::TrafficConfig;
use crate::traffic::driver::{DriverStats, TrafficDriver};
use crate::traffic::trace::load_trace;
use crate::traffic::TrafficOp;

/// The device the traffic driver is connected to.
pub enum RootMemory {
    Cached(CacheMemory),
    Plain(Memory),
    Staller(Staller),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootReport {
    Cache(CacheReport),
    Memory(MemoryReport),
    Staller(MemoryStats),
}

impl RootMemory {
    pub fn build(engine: &mut Engine, config: &SimulatorConfig) -> Self {
        match config.sim.root {
            RootKind::Cache => Self::Cached(CacheMemory::new(
                engine,
                &config.cache,
                &config.dram,
                &config.pcm,
            )),
            RootKind::Memory => Self::Plain(Memory::new(engine, &config.pcm)),
            RootKind::Staller => Self::Staller(Staller::new(
                engine,
                "staller",
                config.sim.staller_penalty,
                config.pcm.block_size,
            )),
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        match self {
            Self::Cached(cache) => cache.contains(addr),
            Self::Plain(memory) => memory.contains(addr),
            Self::Staller(_) => true,
        }
    }

    pub fn outstanding(&self) -> usize {
        match self {
            Self::Cached(cache) => cache.outstanding(),
            Self::Plain(memory) => memory.outstanding(),
            Self::Staller(staller) => staller.outstanding(),
        }
    }

    pub fn report(&self) -> RootReport {
        match self {
            Self::Cached(cache) => RootReport::Cache(cache.report()),
            Self::Plain(memory) => RootReport::Memory(memory.report()),
            Self::Staller(staller) => RootReport::Staller(staller.stats),
        }
    }
}

impl MemoryPort for RootMemory {
    fn access(&mut self, engine: &mut Engine, request: MemoryRequest, caller: HandlerId) -> bool {
        match self {
            Self::Cached(cache) => cache.access(engine, request, caller),
            Self::Plain(memory) => memory.access(engine, request, caller),
            Self::Staller(staller) => staller.access(engine, request, caller),
        }
    }

    fn handles(&self, id: HandlerId) -> bool {
        match self {
            Self::Cached(cache) => cache.handles(id),
            Self::Plain(memory) => memory.handles(id),
            Self::Staller(staller) => staller.handles(id),
        }
    }

    fn id(&self) -> HandlerId {
        match self {
            Self::Cached(cache) => cache.id(),
            Self::Plain(memory) => memory.id(),
            Self::Staller(staller) => staller.id(),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Self::Cached(cache) => cache.size(),
            Self::Plain(memory) => memory.size(),
            Self::Staller(staller) => staller.size(),
        }
    }

    fn block_size(&self) -> u64 {
        match self {
            Self::Cached(cache) => cache.block_size(),
            Self::Plain(memory) => memory.block_size(),
            Self::Staller(staller) => staller.block_size(),
        }
    }
}

impl EventHandler for RootMemory {
    fn process(&mut self, engine: &mut Engine, event: Event) {
        match self {
            Self::Cached(cache) => cache.process(engine, event),
            Self::Plain(memory) => memory.process(engine, event),
            Self::Staller(staller) => staller.process(engine, event),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        match self {
            Self::Cached(cache) => cache.snapshot(),
            Self::Plain(memory) => memory.snapshot(),
            Self::Staller(staller) => staller.snapshot(),
        }
    }
}

/// Everything the engine dispatches to: the driver and the device tree under it.
pub struct World {
    pub driver: TrafficDriver,
    pub root: RootMemory,
}

impl EventHandler for World {
    fn process(&mut self, engine: &mut Engine, event: Event) {
        if self.root.handles(event.handler()) {
            self.root.process(engine, event);
        } else if event.handler() == self.driver.id() {
            self.driver.process(engine, event);
            self.driver.pump(engine, &mut self.root);
        } else {
            panic!(
                "event for unknown handler {} ({})",
                event.handler(),
                engine.handler_name(event.handler())
            );
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        json!({
            "driver": self.driver.snapshot(),
            "memory": self.root.snapshot(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub finished: bool,
    pub engine: EngineStats,
    pub driver: DriverStats,
    pub average_latency: f64,
    pub memory: RootReport,
}

pub struct Simulator {
    engine: Engine,
    world: World,
}

impl Simulator {
    pub fn from_config(config: SimulatorConfig) -> anyhow::Result<Self> {
        config.validate();
        config.traffic.validate().context("invalid [traffic] section")?;

        let mut engine = Engine::new(&config.engine);
        if let Some(path) = &config.engine.stats_file {
            let sink = JsonLinesSink::create(path)?;
            engine = engine.with_sink(Box::new(sink));
        }

        let root = RootMemory::build(&mut engine, &config);
        let driver = match &config.traffic.file {
            Some(path) => {
                let ops = load_trace(path)?;
                check_trace(&root, path, &ops)?;
                TrafficDriver::from_trace(&mut engine, &config.traffic, ops)
            }
            None => {
                check_footprint(&root, &config.traffic)?;
                TrafficDriver::from_pattern(&mut engine, &config.traffic)?
            }
        };
        info!(
            "built {:?} root of {} bytes ({} byte blocks)",
            config.sim.root,
            root.size(),
            root.block_size()
        );

        let mut world = World { driver, root };
        world.driver.start(&mut engine);
        Ok(Self { engine, world })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Run until the driver has seen every request complete.
    pub fn run(&mut self) -> SimReport {
        let engine = self.engine.run(&mut self.world);
        let finished = self.world.driver.is_finished();
        if !finished {
            warn!(
                "event queue drained with {} driver requests and {} device requests outstanding",
                self.world.driver.outstanding(),
                self.world.root.outstanding()
            );
        }
        SimReport {
            finished,
            engine,
            driver: self.world.driver.stats.clone(),
            average_latency: self.world.driver.stats.average_latency(),
            memory: self.world.root.report(),
        }
    }

    pub fn now(&self) -> Cycle {
        self.engine.now()
    }
}

fn check_footprint(root: &RootMemory, traffic: &TrafficConfig) -> anyhow::Result<()> {
    let last = traffic
        .base
        .checked_add(traffic.pattern.footprint - 1)
        .context("traffic base + footprint overflows")?;
    if !root.contains(traffic.base) || !root.contains(last) {
        bail!(
            "traffic range {:#x}..={:#x} does not fit the {} byte memory",
            traffic.base,
            last,
            root.size()
        );
    }
    Ok(())
}

fn check_trace(root: &RootMemory, path: &Path, ops: &[TrafficOp]) -> anyhow::Result<()> {
    if let Some((index, op)) = ops.iter().enumerate().find(|(_, op)| !root.contains(op.addr)) {
        bail!(
            "{}: record {} addresses {:#x}, outside the {} byte memory",
            path.display(),
            index + 1,
            op.addr,
            root.size()
        );
    }
    Ok(())
}
