use std::collections::VecDeque;

use log::debug;

use crate::mem::request::MemoryRequest;
use crate::mem::stats::MemoryStats;
use crate::mem::traits::MemoryPort;
use crate::sim::engine::{Engine, Event, EventHandler, HandlerId, Message};
use crate::timeq::Cycle;

/// Pass-through device: admits everything and answers after a fixed penalty.
pub struct Staller {
    id: HandlerId,
    name: String,
    penalty: Cycle,
    block_size: u64,
    pending: VecDeque<(MemoryRequest, HandlerId, Cycle)>,
    pub stats: MemoryStats,
}

impl Staller {
    pub fn new(engine: &mut Engine, name: impl Into<String>, penalty: Cycle, block_size: u64) -> Self {
        let name = name.into();
        Self {
            id: engine.register(name.clone()),
            name,
            penalty,
            block_size,
            pending: VecDeque::new(),
            stats: MemoryStats::default(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl MemoryPort for Staller {
    fn access(&mut self, engine: &mut Engine, request: MemoryRequest, caller: HandlerId) -> bool {
        self.pending.push_back((request, caller, engine.now()));
        self.stats.record_admission(self.pending.len());
        engine.add_event(self.penalty, self.id, Message::Wake(0));
        true
    }

    fn handles(&self, id: HandlerId) -> bool {
        id == self.id
    }

    fn id(&self) -> HandlerId {
        self.id
    }

    fn size(&self) -> u64 {
        u64::MAX
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }
}

impl EventHandler for Staller {
    fn process(&mut self, engine: &mut Engine, event: Event) {
        assert!(
            matches!(event.message(), Message::Wake(_)),
            "{}: unexpected message {:?}",
            self.name,
            event.message()
        );
        // fixed penalty, so wakeups arrive in admission order
        let (request, caller, arrived_at) = self
            .pending
            .pop_front()
            .unwrap_or_else(|| panic!("{}: wakeup with nothing pending", self.name));
        self.stats
            .record_completion(request.kind, engine.now() - arrived_at);
        debug!("{}: {:#x} done", self.name, request.addr);
        engine.add_event(
            0,
            caller,
            Message::AccessCompleted {
                request,
                from: self.id,
            },
        );
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.stats).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::request::AccessKind;
    use crate::mem::testing::{engine, Probe, TestWorld};

    #[test]
    fn every_access_completes_after_the_penalty() {
        let mut engine = engine();
        let staller = Staller::new(&mut engine, "staller", 100, 64);
        let probe = Probe::new(&mut engine);
        let mut world = TestWorld::new(staller, probe);
        let a = world.issue(&mut engine, 0, AccessKind::Read);
        let b = world.issue(&mut engine, 0x40, AccessKind::Write);
        engine.run(&mut world);
        assert_eq!(Some(100), world.probe.completed_at(&a));
        assert_eq!(Some(100), world.probe.completed_at(&b));
        assert_eq!(vec![a.id.seq, b.id.seq], world.probe.completion_order());
        assert_eq!(1, world.device.stats.reads);
        assert_eq!(1, world.device.stats.writes);
        assert_eq!(0, world.device.outstanding());
    }
}
