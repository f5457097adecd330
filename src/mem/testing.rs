//! Test harness: a recording client wired to one device under test.

use std::collections::VecDeque;

use crate::mem::request::{AccessKind, MemoryRequest, RequestSeq};
use crate::mem::traits::{MemoryCallback, MemoryPort};
use crate::sim::config::EngineConfig;
use crate::sim::engine::{Engine, Event, EventHandler, HandlerId, Message};
use crate::timeq::Cycle;

pub(crate) fn engine() -> Engine {
    Engine::new(&EngineConfig {
        progress_period: 0,
        ..EngineConfig::default()
    })
}

/// Records every notification it receives together with its timestamp.
pub(crate) struct Probe {
    pub id: HandlerId,
    seq: RequestSeq,
    pub completions: Vec<(Cycle, MemoryRequest)>,
    pub unstalls: Vec<(Cycle, HandlerId)>,
    /// Rejected requests, retried one per unstall.
    pub deferred: VecDeque<MemoryRequest>,
    pub retries: Vec<(Cycle, bool)>,
    scheduled: Vec<MemoryRequest>,
}

impl Probe {
    pub fn new(engine: &mut Engine) -> Self {
        let id = engine.register("probe");
        Self {
            id,
            seq: RequestSeq::new(id),
            completions: Vec::new(),
            unstalls: Vec::new(),
            deferred: VecDeque::new(),
            retries: Vec::new(),
            scheduled: Vec::new(),
        }
    }

    pub fn request(&mut self, addr: u64, kind: AccessKind) -> MemoryRequest {
        self.seq.request(addr, kind)
    }

    pub fn completed_at(&self, request: &MemoryRequest) -> Option<Cycle> {
        self.completions
            .iter()
            .find(|(_, done)| done.id == request.id)
            .map(|&(at, _)| at)
    }

    pub fn completion_order(&self) -> Vec<u64> {
        self.completions.iter().map(|(_, r)| r.id.seq).collect()
    }
}

impl MemoryCallback for Probe {
    fn access_completed(&mut self, engine: &mut Engine, request: MemoryRequest, _from: HandlerId) {
        self.completions.push((engine.now(), request));
    }

    fn unstall(&mut self, engine: &mut Engine, from: HandlerId) {
        self.unstalls.push((engine.now(), from));
    }
}

pub(crate) struct TestWorld<M> {
    pub device: M,
    pub probe: Probe,
}

impl<M: MemoryPort> TestWorld<M> {
    pub fn new(device: M, probe: Probe) -> Self {
        Self { device, probe }
    }

    /// Send `request`; on rejection it is parked and retried on the next unstall.
    pub fn submit(&mut self, engine: &mut Engine, request: MemoryRequest) -> bool {
        let accepted = self.device.access(engine, request, self.probe.id);
        if !accepted {
            self.probe.deferred.push_back(request);
        }
        accepted
    }

    pub fn issue(&mut self, engine: &mut Engine, addr: u64, kind: AccessKind) -> MemoryRequest {
        let request = self.probe.request(addr, kind);
        self.submit(engine, request);
        request
    }

    /// Like `issue`, but the request is sent at cycle `at`.
    pub fn issue_at(&mut self, engine: &mut Engine, at: Cycle, addr: u64, kind: AccessKind) -> MemoryRequest {
        let request = self.probe.request(addr, kind);
        let tag = self.probe.scheduled.len() as u64;
        self.probe.scheduled.push(request);
        engine.add_event_at(at, self.probe.id, Message::Wake(tag));
        request
    }
}

impl<M: MemoryPort> EventHandler for TestWorld<M> {
    fn process(&mut self, engine: &mut Engine, event: Event) {
        if self.device.handles(event.handler()) {
            self.device.process(engine, event);
            return;
        }
        assert_eq!(self.probe.id, event.handler(), "event for unknown handler");
        match event.message() {
            Message::AccessCompleted { request, from } => {
                self.probe.access_completed(engine, request, from)
            }
            Message::Unstall { from } => {
                self.probe.unstall(engine, from);
                if let Some(request) = self.probe.deferred.pop_front() {
                    let accepted = self.device.access(engine, request, self.probe.id);
                    self.probe.retries.push((engine.now(), accepted));
                    if !accepted {
                        self.probe.deferred.push_front(request);
                    }
                }
            }
            Message::Wake(tag) => {
                let request = self.probe.scheduled[tag as usize];
                self.submit(engine, request);
            }
            other => panic!("probe: unexpected {:?}", other),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        self.device.snapshot()
    }
}
