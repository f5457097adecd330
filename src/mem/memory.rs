//! One physical memory device.
//!
//! A request admitted by [`Memory::access`] is charged against the global
//! queue or its bank's queue, waits behind any conflicting in-flight request
//! to the same block, is served by its bank under the configured row-buffer
//! policy and finally crosses the device bus. Completion and unstall
//! notifications go back to callers as zero-delay engine messages.

use std::collections::{HashMap, VecDeque};

use log::debug;
use serde::Serialize;
use smallvec::SmallVec;

use crate::mem::bank::Bank;
use crate::mem::bus::Bus;
use crate::mem::config::MemoryConfig;
use crate::mem::mapping::{Coordinates, MemoryMapping};
use crate::mem::request::{MemoryRequest, RequestId};
use crate::mem::stats::{BankStats, BusStats, Hazard, MemoryStats};
use crate::mem::traits::{BusCallback, MemoryCallback, MemoryPort};
use crate::sim::engine::{Engine, Event, EventHandler, HandlerId, Message};
use crate::timeq::Cycle;

#[derive(Debug)]
struct Entry {
    request: MemoryRequest,
    caller: HandlerId,
    block: u64,
    coords: Coordinates,
    queue: usize,
    arrived_at: Cycle,
    dispatched_at: Option<Cycle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub name: String,
    pub average_read_time: f64,
    pub average_write_time: f64,
    pub memory: MemoryStats,
    pub bus: BusStats,
    pub banks: BankStats,
}

pub struct Memory {
    id: HandlerId,
    name: String,
    offset: u64,
    max_queue_size: usize,
    debug_start: Option<Cycle>,
    mapping: MemoryMapping,
    bus: Bus,
    banks: Vec<Bank>,
    /// Admitted, not yet completed requests per queue (one entry when the queue is global).
    occupancy: Vec<usize>,
    entries: HashMap<RequestId, Entry>,
    /// In-flight requests per block, in admission order.
    chains: HashMap<u64, VecDeque<RequestId>>,
    transfers: HashMap<u64, RequestId>,
    next_transfer: u64,
    /// Rejected callers with the queue that turned them away and the time of their first rejection.
    stalled: VecDeque<(HandlerId, usize, Cycle)>,
    pub stats: MemoryStats,
}

impl Memory {
    pub fn new(engine: &mut Engine, config: &MemoryConfig) -> Self {
        config.ensure_valid();
        let id = engine.register(config.name.clone());
        let bus = Bus::new(
            engine,
            format!("{}.bus", config.name),
            config.bus_latency,
            config.debug_start,
        );
        let mapping = MemoryMapping::from_config(config);
        let num_queues = if config.global_queue { 1 } else { mapping.num_banks() };
        Self {
            id,
            name: config.name.clone(),
            offset: config.offset,
            max_queue_size: config.max_queue_size,
            debug_start: config.debug_start,
            banks: (0..mapping.num_banks()).map(|_| Bank::new(config)).collect(),
            mapping,
            bus,
            occupancy: vec![0; num_queues],
            entries: HashMap::new(),
            chains: HashMap::new(),
            transfers: HashMap::new(),
            next_transfer: 0,
            stalled: VecDeque::new(),
            stats: MemoryStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    /// Whether `addr` falls inside the range this device maps.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.offset && addr - self.offset < self.mapping.total_size()
    }

    pub fn stalled_callers(&self) -> usize {
        self.stalled.len()
    }

    pub fn bank_stats(&self) -> BankStats {
        let mut total = BankStats::default();
        for bank in &self.banks {
            total += &bank.stats;
        }
        total
    }

    pub fn report(&self) -> MemoryReport {
        MemoryReport {
            name: self.name.clone(),
            average_read_time: self.stats.average_read_time(),
            average_write_time: self.stats.average_write_time(),
            memory: self.stats,
            bus: self.bus.stats,
            banks: self.bank_stats(),
        }
    }

    fn local_address(&self, addr: u64) -> u64 {
        assert!(
            addr >= self.offset,
            "{}: address {:#x} below device offset {:#x}",
            self.name,
            addr,
            self.offset
        );
        addr - self.offset
    }

    fn queue_index(&self, coords: &Coordinates) -> usize {
        if self.occupancy.len() == 1 {
            0
        } else {
            self.mapping.bank_index(coords)
        }
    }

    /// A caller retries one request at a time, so only its latest rejecting queue matters.
    fn stall(&mut self, engine: &Engine, caller: HandlerId, queue: usize) {
        self.stats.record_rejection();
        match self.stalled.iter_mut().find(|(id, _, _)| *id == caller) {
            Some(stalled) => stalled.1 = queue,
            None => self.stalled.push_back((caller, queue, engine.now())),
        }
    }

    /// Wake the longest-waiting caller turned away by `queue`.
    fn unstall_one(&mut self, engine: &mut Engine, queue: usize) {
        let Some(pos) = self.stalled.iter().position(|&(_, q, _)| q == queue) else {
            return;
        };
        if let Some((caller, _, since)) = self.stalled.remove(pos) {
            self.stats.record_stall(engine.now() - since);
            engine.add_event(0, caller, Message::Unstall { from: self.id });
        }
    }

    /// Whether an earlier entry of the chain conflicts with `id`.
    fn blocked(&self, chain: &VecDeque<RequestId>, id: RequestId) -> bool {
        let kind = self.entries[&id].request.kind;
        chain
            .iter()
            .take_while(|&&earlier| earlier != id)
            .any(|earlier| self.entries[earlier].request.kind.conflicts_with(kind))
    }

    fn dispatch(&mut self, engine: &mut Engine, id: RequestId) {
        let now = engine.now();
        let entry = self
            .entries
            .get_mut(&id)
            .unwrap_or_else(|| panic!("dispatch of unknown request {:?}", id));
        entry.dispatched_at = Some(now);
        self.stats
            .record_dispatch(entry.request.kind, now - entry.arrived_at);
        let bank = self.mapping.bank_index(&entry.coords);
        let ticket = self.banks[bank].enqueue(now, entry.coords.row, id);
        if engine.traced(self.debug_start) {
            debug!(
                "{}: {:?} {:#x} bank {} row {} ready at {}",
                self.name,
                entry.request.kind,
                entry.request.addr,
                bank,
                entry.coords.row,
                ticket.ready_at()
            );
        }
        engine.add_event_at(ticket.ready_at(), self.id, Message::Wake(bank as u64));
    }

    fn bank_finished(&mut self, engine: &mut Engine, bank: usize) {
        let id = self.banks[bank]
            .pop_ready(engine.now())
            .unwrap_or_else(|| panic!("{}: bank {} woke without a finished request", self.name, bank));
        let tag = self.next_transfer;
        self.next_transfer += 1;
        self.transfers.insert(tag, id);
        self.bus.schedule(engine, 0, self.id, tag);
    }

    /// Dispatch every waiting request of `block` that no longer has a conflicting predecessor.
    fn release_block(&mut self, engine: &mut Engine, block: u64) {
        let Some(chain) = self.chains.get(&block) else {
            return;
        };
        let ready: SmallVec<[RequestId; 4]> = chain
            .iter()
            .copied()
            .filter(|id| self.entries[id].dispatched_at.is_none() && !self.blocked(chain, *id))
            .collect();
        for id in ready {
            self.dispatch(engine, id);
        }
    }
}

impl MemoryPort for Memory {
    fn access(&mut self, engine: &mut Engine, request: MemoryRequest, caller: HandlerId) -> bool {
        let local = self.local_address(request.addr);
        let coords = self.mapping.decompose(local);
        let queue = self.queue_index(&coords);
        if self.occupancy[queue] >= self.max_queue_size {
            if engine.traced(self.debug_start) {
                debug!(
                    "{}: queue {} full, rejecting {:#x} from {}",
                    self.name,
                    queue,
                    request.addr,
                    engine.handler_name(caller)
                );
            }
            self.stall(engine, caller, queue);
            return false;
        }
        self.occupancy[queue] += 1;
        self.stats.record_admission(self.occupancy[queue]);

        let block = self.mapping.block_address(local);
        let chain = self.chains.entry(block).or_default();
        if let Some(last) = chain.back() {
            self.stats
                .record_hazard(Hazard::between(self.entries[last].request.kind, request.kind));
        }
        chain.push_back(request.id);
        let previous = self.entries.insert(
            request.id,
            Entry {
                request,
                caller,
                block,
                coords,
                queue,
                arrived_at: engine.now(),
                dispatched_at: None,
            },
        );
        assert!(previous.is_none(), "{}: duplicate request {:?}", self.name, request.id);

        if !self.blocked(&self.chains[&block], request.id) {
            self.dispatch(engine, request.id);
        }
        true
    }

    fn handles(&self, id: HandlerId) -> bool {
        id == self.id || id == self.bus.id()
    }

    fn id(&self) -> HandlerId {
        self.id
    }

    fn size(&self) -> u64 {
        self.mapping.total_size()
    }

    fn block_size(&self) -> u64 {
        self.mapping.block_size()
    }
}

impl MemoryCallback for Memory {
    /// The bank and bus chain of `request` is done.
    fn access_completed(&mut self, engine: &mut Engine, request: MemoryRequest, _from: HandlerId) {
        let now = engine.now();
        let entry = self
            .entries
            .remove(&request.id)
            .unwrap_or_else(|| panic!("{}: completion of unknown request {:?}", self.name, request.id));
        self.stats
            .record_completion(entry.request.kind, now - entry.arrived_at);
        self.occupancy[entry.queue] -= 1;
        engine.add_event(
            0,
            entry.caller,
            Message::AccessCompleted {
                request: entry.request,
                from: self.id,
            },
        );

        if let Some(chain) = self.chains.get_mut(&entry.block) {
            chain.retain(|&id| id != request.id);
            if chain.is_empty() {
                self.chains.remove(&entry.block);
            }
        }
        self.release_block(engine, entry.block);

        self.unstall_one(engine, entry.queue);
    }

    fn unstall(&mut self, _engine: &mut Engine, _from: HandlerId) {}
}

impl BusCallback for Memory {
    fn bus_granted(&mut self, engine: &mut Engine, tag: u64) {
        let id = self
            .transfers
            .remove(&tag)
            .unwrap_or_else(|| panic!("{}: bus grant for unknown transfer {}", self.name, tag));
        let request = self.entries[&id].request;
        self.access_completed(engine, request, self.id);
    }
}

impl EventHandler for Memory {
    fn process(&mut self, engine: &mut Engine, event: Event) {
        if event.handler() == self.bus.id() {
            self.bus.process(engine, event);
            return;
        }
        match event.message() {
            Message::Wake(bank) => self.bank_finished(engine, bank as usize),
            Message::BusGranted(tag) => self.bus_granted(engine, tag),
            Message::Unstall { from } => self.unstall(engine, from),
            other => panic!("{}: unexpected message {:?}", self.name, other),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.report()).unwrap_or_default()
    }
}
