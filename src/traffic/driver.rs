use std::collections::HashMap;
use std::vec;

use anyhow::ensure;
use log::debug;
use serde::Serialize;

use crate::mem::request::{AccessKind, MemoryRequest, RequestId, RequestSeq};
use crate::mem::traits::{MemoryCallback, MemoryPort};
use crate::sim::engine::{Engine, Event, EventHandler, HandlerId, Message};
use crate::timeq::Cycle;
use crate::traffic::config::TrafficConfig;
use crate::traffic::logging::TrafficLogger;
use crate::traffic::patterns::{PatternEngine, TrafficOp};

const LATENCY_BUCKETS: usize = 32;
const CHECKPOINT_EVERY: u64 = 100_000;

#[derive(Debug, Clone, Serialize)]
pub struct DriverStats {
    pub issued: u64,
    pub completed: u64,
    pub reads: u64,
    pub writes: u64,
    pub rejections: u64,
    pub total_latency: u64,
    pub min_latency: Option<Cycle>,
    pub max_latency: Cycle,
    /// Bucket `i` counts latencies in `[2^(i-1), 2^i)`; bucket 0 is zero latency.
    pub latency_histogram: Vec<u64>,
    pub last_completion: Cycle,
}

impl Default for DriverStats {
    fn default() -> Self {
        Self {
            issued: 0,
            completed: 0,
            reads: 0,
            writes: 0,
            rejections: 0,
            total_latency: 0,
            min_latency: None,
            max_latency: 0,
            latency_histogram: vec![0; LATENCY_BUCKETS],
            last_completion: 0,
        }
    }
}

impl DriverStats {
    pub fn record_latency(&mut self, kind: AccessKind, latency: Cycle, now: Cycle) {
        self.completed = self.completed.saturating_add(1);
        if kind.is_write() {
            self.writes = self.writes.saturating_add(1);
        } else {
            self.reads = self.reads.saturating_add(1);
        }
        self.total_latency = self.total_latency.saturating_add(latency);
        self.min_latency = Some(self.min_latency.map_or(latency, |min| min.min(latency)));
        self.max_latency = self.max_latency.max(latency);
        let bucket = (Cycle::BITS - latency.leading_zeros()) as usize;
        self.latency_histogram[bucket.min(LATENCY_BUCKETS - 1)] += 1;
        self.last_completion = now;
    }

    pub fn average_latency(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.completed as f64
        }
    }
}

enum TrafficSource {
    Trace(vec::IntoIter<TrafficOp>),
    Pattern(PatternEngine),
}

impl TrafficSource {
    fn next_op(&mut self) -> Option<TrafficOp> {
        match self {
            Self::Trace(ops) => ops.next(),
            Self::Pattern(engine) => Some(engine.next_op()),
        }
    }
}

/// Feeds requests into a memory device and measures their latency.
///
/// At most `max_outstanding` requests are in flight and two issues are at
/// least `issue_interval` cycles apart. A rejected request is held and sent
/// again, before anything newer, once the device unstalls the driver.
pub struct TrafficDriver {
    id: HandlerId,
    name: String,
    seq: RequestSeq,
    source: TrafficSource,
    limit: Option<u64>,
    exhausted: bool,
    max_outstanding: usize,
    issue_interval: Cycle,
    next_issue_at: Cycle,
    wake_pending: bool,
    outstanding: HashMap<RequestId, Cycle>,
    pending: Option<MemoryRequest>,
    unstalled: bool,
    finished: bool,
    debug_start: Option<Cycle>,
    pub stats: DriverStats,
}

impl TrafficDriver {
    pub fn from_pattern(engine: &mut Engine, config: &TrafficConfig) -> anyhow::Result<Self> {
        ensure!(
            config.num_requests > 0,
            "synthetic traffic needs num_requests > 0"
        );
        let pattern = PatternEngine::new(config)?;
        TrafficLogger::log_start("driver", &pattern.name, Some(config.num_requests));
        Ok(Self::new(
            engine,
            config,
            TrafficSource::Pattern(pattern),
            Some(config.num_requests),
        ))
    }

    pub fn from_trace(engine: &mut Engine, config: &TrafficConfig, ops: Vec<TrafficOp>) -> Self {
        let limit = (config.num_requests > 0).then_some(config.num_requests);
        let source = match &config.file {
            Some(path) => path.display().to_string(),
            None => "inline trace".to_string(),
        };
        TrafficLogger::log_start("driver", &source, limit);
        Self::new(engine, config, TrafficSource::Trace(ops.into_iter()), limit)
    }

    fn new(engine: &mut Engine, config: &TrafficConfig, source: TrafficSource, limit: Option<u64>) -> Self {
        assert!(config.max_outstanding > 0, "traffic max_outstanding must be > 0");
        let id = engine.register("driver");
        Self {
            id,
            name: "driver".to_string(),
            seq: RequestSeq::new(id),
            source,
            limit,
            exhausted: false,
            max_outstanding: config.max_outstanding,
            issue_interval: config.issue_interval,
            next_issue_at: 0,
            wake_pending: false,
            outstanding: HashMap::new(),
            pending: None,
            unstalled: false,
            finished: false,
            debug_start: config.debug_start,
            stats: DriverStats::default(),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Schedule the first issue attempt.
    pub fn start(&mut self, engine: &mut Engine) {
        self.wake_pending = true;
        engine.add_event(0, self.id, Message::Wake(0));
    }

    /// Retry a rejected request if the device unstalled us, then issue as
    /// much new traffic as the window and issue rate allow.
    pub fn pump<M: MemoryPort>(&mut self, engine: &mut Engine, memory: &mut M) {
        if let Some(request) = self.pending {
            if !self.unstalled {
                return;
            }
            self.unstalled = false;
            if !self.send(engine, memory, request) {
                return;
            }
        }

        while !self.exhausted && self.outstanding.len() < self.max_outstanding {
            if self.limit.is_some_and(|limit| self.stats.issued >= limit) {
                self.exhausted = true;
                break;
            }
            if engine.now() < self.next_issue_at {
                if !self.wake_pending {
                    self.wake_pending = true;
                    engine.add_event_at(self.next_issue_at, self.id, Message::Wake(0));
                }
                break;
            }
            let Some(op) = self.source.next_op() else {
                self.exhausted = true;
                break;
            };
            let request = self.seq.request(op.addr, op.kind);
            if !self.send(engine, memory, request) {
                return;
            }
        }

        if self.exhausted && self.outstanding.is_empty() && self.pending.is_none() && !self.finished {
            self.finished = true;
            TrafficLogger::log_done(&self.name, self.stats.completed, engine.now());
            engine.quit();
        }
    }

    fn send<M: MemoryPort>(&mut self, engine: &mut Engine, memory: &mut M, request: MemoryRequest) -> bool {
        let now = engine.now();
        if !memory.access(engine, request, self.id) {
            self.stats.rejections = self.stats.rejections.saturating_add(1);
            self.pending = Some(request);
            return false;
        }
        if engine.traced(self.debug_start) {
            debug!("{}: issued {:?} {:#x}", self.name, request.kind, request.addr);
        }
        self.pending = None;
        self.outstanding.insert(request.id, now);
        self.stats.issued = self.stats.issued.saturating_add(1);
        self.next_issue_at = now + self.issue_interval;
        true
    }
}

impl MemoryCallback for TrafficDriver {
    fn access_completed(&mut self, engine: &mut Engine, request: MemoryRequest, _from: HandlerId) {
        let now = engine.now();
        let issued_at = self
            .outstanding
            .remove(&request.id)
            .unwrap_or_else(|| panic!("{}: completion for unknown request {:?}", self.name, request.id));
        self.stats.record_latency(request.kind, now - issued_at, now);
        if self.stats.completed % CHECKPOINT_EVERY == 0 {
            TrafficLogger::log_checkpoint(&self.name, self.stats.completed, now);
        }
    }

    fn unstall(&mut self, _engine: &mut Engine, _from: HandlerId) {
        self.unstalled = true;
    }
}

impl EventHandler for TrafficDriver {
    fn process(&mut self, engine: &mut Engine, event: Event) {
        match event.message() {
            Message::Wake(_) => self.wake_pending = false,
            Message::AccessCompleted { request, from } => self.access_completed(engine, request, from),
            Message::Unstall { from } => self.unstall(engine, from),
            other => panic!("{}: unexpected message {:?}", self.name, other),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(&self.stats).unwrap_or_default()
    }
}
