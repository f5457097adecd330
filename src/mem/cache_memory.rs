//! Fast tier used as a cache in front of a slow tier.
//!
//! Every cache block has at most one internal request in flight. A request
//! to a block that is already busy, or whose dirty data is still being
//! written back, waits in that block's FIFO and is started through a fresh
//! pipeline once the block is free again.
//!
//! Pipeline of one internal request:
//!
//! ```text
//! Start --(penalty)--> tag lookup --hit--> ReadDram --> Done
//!                                 \-miss-> ReadPcm ---> Done
//! ```
//!
//! A hit is a single fast-tier access at the frame holding the block. A miss
//! reads the dirty victim out of the frame (each piece is written back to
//! the slow tier as it arrives), then fetches the missing block from the slow
//! tier starting at the requested piece; each fetched piece is filled into
//! the frame without waiting for the fill. The request is done once both the
//! fast-tier and slow-tier read counters drain.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;
use serde::Serialize;

use crate::mem::cache_model::{CacheModel, CacheOutcome};
use crate::mem::config::{CacheConfig, MemoryConfig};
use crate::mem::memory::{Memory, MemoryReport};
use crate::mem::request::{AccessKind, MemoryRequest, RequestId, RequestSeq};
use crate::mem::stats::CacheStats;
use crate::mem::traits::{MemoryCallback, MemoryPort};
use crate::sim::engine::{Engine, Event, EventHandler, HandlerId, Message};
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    ReadDram,
    ReadPcm,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Dram,
    Pcm,
}

/// Why a sub-request was sent to a tier.
#[derive(Debug, Clone, Copy)]
enum Purpose {
    Demand { block: u64 },
    VictimRead { block: u64, victim: u64, offset: u64 },
    Fetch { block: u64, offset: u64 },
    Fill,
    Writeback { victim: u64 },
}

#[derive(Debug)]
struct Outgoing {
    purpose: Purpose,
    tier: Tier,
    issued_at: Cycle,
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    request: MemoryRequest,
    caller: HandlerId,
    arrived_at: Cycle,
}

#[derive(Debug)]
struct InternalRequest {
    waiter: Waiter,
    stage: Stage,
    outcome: Option<CacheOutcome>,
    evicted: Option<u64>,
    dram_reads_left: u64,
    pcm_reads_left: u64,
    dequeued_at: Cycle,
    tag_done_at: Cycle,
}

/// A sub-request a tier did not admit yet.
#[derive(Debug, Clone, Copy)]
struct DelayedRequest {
    request: MemoryRequest,
    deferred_at: Cycle,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub name: String,
    pub hit_rate: f64,
    pub cache: CacheStats,
    pub dram: MemoryReport,
    pub pcm: MemoryReport,
}

pub struct CacheMemory {
    id: HandlerId,
    name: String,
    penalty: Cycle,
    block_size: u64,
    small_block_size: u64,
    max_queue_size: usize,
    debug_start: Option<Cycle>,
    dram_base: u64,
    model: CacheModel,
    dram: Memory,
    pcm: Memory,
    seq: RequestSeq,

    internal: HashMap<u64, InternalRequest>,
    waiting: HashMap<u64, VecDeque<Waiter>>,
    outgoing: HashMap<RequestId, Outgoing>,
    /// Slow-tier writes still outstanding per evicted block.
    writebacks: HashMap<u64, u64>,
    /// Blocks whose tag lookup is parked until their writeback finishes.
    waiting_tag: HashSet<u64>,
    stalled_dram: VecDeque<DelayedRequest>,
    stalled_pcm: VecDeque<DelayedRequest>,
    /// Admitted requests not yet completed, in flight or waiting.
    queue_size: usize,
    stalled: VecDeque<(HandlerId, Cycle)>,
    pub stats: CacheStats,
}

impl CacheMemory {
    pub fn new(engine: &mut Engine, config: &CacheConfig, dram: &MemoryConfig, pcm: &MemoryConfig) -> Self {
        config.ensure_valid(dram, pcm);
        let id = engine.register(config.name.clone());
        Self {
            id,
            name: config.name.clone(),
            penalty: config.penalty,
            block_size: config.block_size,
            small_block_size: config.small_block_size,
            max_queue_size: config.max_queue_size,
            debug_start: config.debug_start,
            dram_base: dram.offset,
            model: CacheModel::from_config(config, dram),
            dram: Memory::new(engine, dram),
            pcm: Memory::new(engine, pcm),
            seq: RequestSeq::new(id),
            internal: HashMap::new(),
            waiting: HashMap::new(),
            outgoing: HashMap::new(),
            writebacks: HashMap::new(),
            waiting_tag: HashSet::new(),
            stalled_dram: VecDeque::new(),
            stalled_pcm: VecDeque::new(),
            queue_size: 0,
            stalled: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn dram(&self) -> &Memory {
        &self.dram
    }

    pub fn pcm(&self) -> &Memory {
        &self.pcm
    }

    pub fn outstanding(&self) -> usize {
        self.queue_size
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.pcm.contains(addr)
    }

    pub fn pending_writebacks(&self) -> usize {
        self.writebacks.len()
    }

    pub fn deferred_sub_requests(&self) -> usize {
        self.stalled_dram.len() + self.stalled_pcm.len()
    }

    pub fn report(&self) -> CacheReport {
        CacheReport {
            name: self.name.clone(),
            hit_rate: self.stats.hit_rate(),
            cache: self.stats,
            dram: self.dram.report(),
            pcm: self.pcm.report(),
        }
    }

    fn sub_blocks(&self) -> u64 {
        self.block_size / self.small_block_size
    }

    fn cache_block(&self, addr: u64) -> u64 {
        addr - addr % self.block_size
    }

    /// Offset of the small block holding `addr` within its cache block.
    fn critical_offset(&self, addr: u64) -> u64 {
        (addr % self.block_size) & !(self.small_block_size - 1)
    }

    fn frame_address(&self, outcome: &CacheOutcome) -> u64 {
        self.dram_base + outcome.frame * self.block_size
    }

    fn traced(&self, engine: &Engine) -> bool {
        engine.traced(self.debug_start)
    }

    fn start(&mut self, engine: &mut Engine, block: u64, waiter: Waiter) {
        let now = engine.now();
        assert!(
            !self.internal.contains_key(&block),
            "{}: second internal request for block {:#x}",
            self.name,
            block
        );
        self.stats
            .record_dequeue(waiter.request.kind, now - waiter.arrived_at);
        self.internal.insert(
            block,
            InternalRequest {
                waiter,
                stage: Stage::Start,
                outcome: None,
                evicted: None,
                dram_reads_left: 0,
                pcm_reads_left: 0,
                dequeued_at: now,
                tag_done_at: now,
            },
        );
        engine.add_event(self.penalty, self.id, Message::Wake(block));
    }

    fn start_next_waiter(&mut self, engine: &mut Engine, block: u64) {
        let Some(queue) = self.waiting.get_mut(&block) else {
            return;
        };
        let next = queue.pop_front();
        if queue.is_empty() {
            self.waiting.remove(&block);
        }
        if let Some(waiter) = next {
            self.start(engine, block, waiter);
        }
    }

    fn tag_lookup(&mut self, engine: &mut Engine, block: u64) {
        let now = engine.now();
        if self.writebacks.contains_key(&block) {
            // evicted between admission and lookup; the slow tier copy is not written yet
            self.waiting_tag.insert(block);
            self.stats.num_waits_on_writeback += 1;
            return;
        }
        let n = self.sub_blocks();
        let small = self.small_block_size;
        let (request, dequeued_at) = {
            let ir = self.internal_mut(block);
            assert_eq!(Stage::Start, ir.stage, "tag lookup ran twice for {:#x}", block);
            (ir.waiter.request, ir.dequeued_at)
        };
        let critical = self.critical_offset(request.addr);
        let outcome = self.model.access(block, request.is_write());
        self.stats
            .record_lookup(outcome.hit, request.kind, now - dequeued_at);
        let frame_addr = self.frame_address(&outcome);
        let victim = outcome.victim.filter(|victim| victim.dirty);

        let ir = self.internal_mut(block);
        ir.tag_done_at = now;
        ir.outcome = Some(outcome);
        if outcome.hit {
            ir.stage = Stage::ReadDram;
            ir.dram_reads_left = 1;
            let kind = if request.is_write() {
                AccessKind::Write
            } else {
                AccessKind::Read
            };
            if self.traced(engine) {
                debug!("{}: {:#x} hit in frame {}", self.name, request.addr, outcome.frame);
            }
            self.issue(engine, Tier::Dram, frame_addr + critical, kind, Purpose::Demand { block });
            return;
        }

        ir.stage = Stage::ReadPcm;
        ir.pcm_reads_left = n;
        if let Some(victim) = victim {
            ir.evicted = Some(victim.addr);
            ir.dram_reads_left = n;
        }
        if self.traced(engine) {
            debug!(
                "{}: {:#x} miss in frame {}, victim {:?}",
                self.name, request.addr, outcome.frame, outcome.victim
            );
        }

        if let Some(victim) = victim {
            self.stats.dirty_evictions += 1;
            *self.writebacks.entry(victim.addr).or_insert(0) += n;
            for i in 0..n {
                let offset = i * small;
                self.issue(
                    engine,
                    Tier::Dram,
                    frame_addr + offset,
                    AccessKind::Read,
                    Purpose::VictimRead {
                        block,
                        victim: victim.addr,
                        offset,
                    },
                );
            }
        }
        for i in 0..n {
            let offset = (critical + i * small) % self.block_size;
            self.issue(
                engine,
                Tier::Pcm,
                block + offset,
                AccessKind::Read,
                Purpose::Fetch { block, offset },
            );
        }
    }

    /// Send a sub-request to a tier, parking it behind earlier deferred ones.
    fn issue(&mut self, engine: &mut Engine, tier: Tier, addr: u64, kind: AccessKind, purpose: Purpose) {
        let request = self.seq.request(addr, kind);
        let now = engine.now();
        let id = self.id;
        self.outgoing.insert(
            request.id,
            Outgoing {
                purpose,
                tier,
                issued_at: now,
            },
        );
        let (memory, deferred) = match tier {
            Tier::Dram => (&mut self.dram, &mut self.stalled_dram),
            Tier::Pcm => (&mut self.pcm, &mut self.stalled_pcm),
        };
        if !deferred.is_empty() || !memory.access(engine, request, id) {
            deferred.push_back(DelayedRequest {
                request,
                deferred_at: now,
            });
        }
    }

    fn internal_mut(&mut self, block: u64) -> &mut InternalRequest {
        self.internal
            .get_mut(&block)
            .unwrap_or_else(|| panic!("sub-request completed for idle block {:#x}", block))
    }

    fn try_finish(&mut self, engine: &mut Engine, block: u64) {
        let ir = &self.internal[&block];
        if ir.stage == Stage::Start || ir.dram_reads_left > 0 || ir.pcm_reads_left > 0 {
            return;
        }
        let Some(mut ir) = self.internal.remove(&block) else {
            return;
        };
        ir.stage = Stage::Done;
        let now = engine.now();
        let total = now - ir.waiter.arrived_at;
        self.stats.record_completion(ir.waiter.request.kind, total);
        if self.traced(engine) {
            debug!(
                "{}: {:#x} {:?} after {} cycles, evicted {:?}",
                self.name, ir.waiter.request.addr, ir.stage, total, ir.evicted
            );
        }
        engine.add_event(
            0,
            ir.waiter.caller,
            Message::AccessCompleted {
                request: ir.waiter.request,
                from: self.id,
            },
        );
        self.queue_size -= 1;

        if !self.writebacks.contains_key(&block) {
            self.start_next_waiter(engine, block);
        }
        if let Some((caller, since)) = self.stalled.pop_front() {
            self.stats.queue_stall_time += now - since;
            engine.add_event(0, caller, Message::Unstall { from: self.id });
        }
    }

    fn writeback_done(&mut self, engine: &mut Engine, victim: u64) {
        let left = self
            .writebacks
            .get_mut(&victim)
            .unwrap_or_else(|| panic!("writeback completed for clean block {:#x}", victim));
        *left -= 1;
        if *left > 0 {
            return;
        }
        self.writebacks.remove(&victim);
        self.stats.writebacks_completed += 1;
        if self.waiting_tag.remove(&victim) {
            engine.add_event(0, self.id, Message::Wake(victim));
        } else if !self.internal.contains_key(&victim) {
            self.start_next_waiter(engine, victim);
        }
    }
}

impl MemoryPort for CacheMemory {
    fn access(&mut self, engine: &mut Engine, request: MemoryRequest, caller: HandlerId) -> bool {
        let now = engine.now();
        if self.queue_size >= self.max_queue_size {
            self.stats.rejections += 1;
            if !self.stalled.iter().any(|&(id, _)| id == caller) {
                self.stalled.push_back((caller, now));
            }
            return false;
        }
        self.queue_size += 1;

        let block = self.cache_block(request.addr);
        let waiter = Waiter {
            request,
            caller,
            arrived_at: now,
        };
        if self.internal.contains_key(&block) {
            self.stats.num_waits_on_data += 1;
            self.waiting.entry(block).or_default().push_back(waiter);
        } else if self.writebacks.contains_key(&block) {
            self.stats.num_waits_on_writeback += 1;
            self.waiting.entry(block).or_default().push_back(waiter);
        } else {
            self.start(engine, block, waiter);
        }
        true
    }

    fn handles(&self, id: HandlerId) -> bool {
        id == self.id || self.dram.handles(id) || self.pcm.handles(id)
    }

    fn id(&self) -> HandlerId {
        self.id
    }

    fn size(&self) -> u64 {
        self.pcm.size()
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }
}

impl MemoryCallback for CacheMemory {
    fn access_completed(&mut self, engine: &mut Engine, request: MemoryRequest, from: HandlerId) {
        let now = engine.now();
        let out = self.outgoing.remove(&request.id).unwrap_or_else(|| {
            panic!(
                "{}: completion for unknown request {:?} from {}",
                self.name,
                request.id,
                engine.handler_name(from)
            )
        });
        match out.tier {
            Tier::Dram => self.stats.dram_access_time += now - out.issued_at,
            Tier::Pcm => self.stats.pcm_access_time += now - out.issued_at,
        }

        match out.purpose {
            Purpose::Demand { block } => {
                let ir = self.internal_mut(block);
                ir.dram_reads_left -= 1;
                let critical = now - ir.tag_done_at;
                self.stats.dram_critical_read_time += critical;
                self.try_finish(engine, block);
            }
            Purpose::VictimRead {
                block,
                victim,
                offset,
            } => {
                self.issue(
                    engine,
                    Tier::Pcm,
                    victim + offset,
                    AccessKind::Write,
                    Purpose::Writeback { victim },
                );
                self.internal_mut(block).dram_reads_left -= 1;
                self.try_finish(engine, block);
            }
            Purpose::Fetch { block, offset } => {
                let ir = self.internal_mut(block);
                ir.pcm_reads_left -= 1;
                let addr = ir.waiter.request.addr;
                let tag_done_at = ir.tag_done_at;
                let outcome = ir
                    .outcome
                    .unwrap_or_else(|| panic!("fetch for {:#x} before its tag lookup", block));
                if offset == self.critical_offset(addr) {
                    self.stats.pcm_critical_read_time += now - tag_done_at;
                }
                let fill = self.frame_address(&outcome) + offset;
                self.issue(engine, Tier::Dram, fill, AccessKind::Write, Purpose::Fill);
                self.try_finish(engine, block);
            }
            Purpose::Fill => {}
            Purpose::Writeback { victim } => self.writeback_done(engine, victim),
        }
    }

    /// Retry the oldest sub-request deferred on the tier that sent the unstall.
    fn unstall(&mut self, engine: &mut Engine, from: HandlerId) {
        let now = engine.now();
        let id = self.id;
        let (memory, deferred, stall_time) = if from == self.dram.id() {
            (&mut self.dram, &mut self.stalled_dram, &mut self.stats.dram_stall_time)
        } else if from == self.pcm.id() {
            (&mut self.pcm, &mut self.stalled_pcm, &mut self.stats.pcm_stall_time)
        } else {
            panic!("{}: unstall from unknown device {}", self.name, engine.handler_name(from));
        };
        let Some(head) = deferred.pop_front() else {
            return;
        };
        if memory.access(engine, head.request, id) {
            *stall_time += now - head.deferred_at;
            if !deferred.is_empty() {
                engine.add_event(0, id, Message::Unstall { from });
            }
        } else {
            deferred.push_front(head);
        }
    }
}

impl EventHandler for CacheMemory {
    fn process(&mut self, engine: &mut Engine, event: Event) {
        let target = event.handler();
        if self.dram.handles(target) {
            self.dram.process(engine, event);
            return;
        }
        if self.pcm.handles(target) {
            self.pcm.process(engine, event);
            return;
        }
        match event.message() {
            Message::Wake(block) => self.tag_lookup(engine, block),
            Message::AccessCompleted { request, from } => self.access_completed(engine, request, from),
            Message::Unstall { from } => self.unstall(engine, from),
            other => panic!("{}: unexpected message {:?}", self.name, other),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.report()).unwrap_or_default()
    }
}
