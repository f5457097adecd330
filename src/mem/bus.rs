use log::debug;

use crate::mem::stats::BusStats;
use crate::sim::engine::{Engine, Event, EventHandler, HandlerId, Message};
use crate::timeq::{Cycle, TimedServer};

#[derive(Debug, Clone, Copy)]
struct Grant {
    caller: HandlerId,
    tag: u64,
}

/// A single shared transfer resource with a fixed per-transfer latency.
///
/// Slots are handed out first come, first served and never overlap; there is
/// no capacity limit, callers are expected to bound their own traffic.
#[derive(Debug)]
pub struct Bus {
    id: HandlerId,
    name: String,
    latency: Cycle,
    debug_start: Option<Cycle>,
    server: TimedServer<Grant>,
    pub stats: BusStats,
}

impl Bus {
    pub fn new(engine: &mut Engine, name: impl Into<String>, latency: Cycle, debug_start: Option<Cycle>) -> Self {
        let name = name.into();
        Self {
            id: engine.register(name.clone()),
            name,
            latency,
            debug_start,
            server: TimedServer::new(),
            stats: BusStats::default(),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn latency(&self) -> Cycle {
        self.latency
    }

    /// Reserve the earliest free slot at or after `now + delay`.
    /// `caller` receives `BusGranted(tag)` when the slot ends; that timestamp is returned.
    pub fn schedule(&mut self, engine: &mut Engine, delay: Cycle, caller: HandlerId, tag: u64) -> Cycle {
        let now = engine.now();
        let earliest = now.saturating_add(delay);
        let ticket = self.server.reserve(now, earliest, self.latency, Grant { caller, tag });
        self.stats
            .record_transfer(ticket.start_at() - earliest, self.latency);
        if engine.traced(self.debug_start) {
            debug!(
                "{}: {} tag {} slot [{}, {})",
                self.name,
                engine.handler_name(caller),
                tag,
                ticket.start_at(),
                ticket.ready_at()
            );
        }
        engine.add_event_at(ticket.ready_at(), self.id, Message::Wake(0));
        ticket.ready_at()
    }

    pub fn pending(&self) -> usize {
        self.server.outstanding()
    }
}

impl EventHandler for Bus {
    fn process(&mut self, engine: &mut Engine, event: Event) {
        assert!(
            matches!(event.message(), Message::Wake(_)),
            "{}: unexpected message {:?}",
            self.name,
            event.message()
        );
        let grant = self
            .server
            .pop_ready(engine.now())
            .unwrap_or_else(|| panic!("{}: slot event without a finished slot", self.name))
            .payload;
        engine.add_event(0, grant.caller, Message::BusGranted(grant.tag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::config::EngineConfig;

    struct BusWorld {
        bus: Bus,
        grants: Vec<(Cycle, HandlerId, u64)>,
    }

    impl EventHandler for BusWorld {
        fn process(&mut self, engine: &mut Engine, event: Event) {
            if event.handler() == self.bus.id() {
                self.bus.process(engine, event);
                return;
            }
            match event.message() {
                Message::BusGranted(tag) => self.grants.push((engine.now(), event.handler(), tag)),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    fn setup(latency: Cycle) -> (Engine, BusWorld, HandlerId, HandlerId) {
        let mut engine = Engine::new(&EngineConfig::default());
        let bus = Bus::new(&mut engine, "bus", latency, None);
        let a = engine.register("a");
        let b = engine.register("b");
        let world = BusWorld {
            bus,
            grants: Vec::new(),
        };
        (engine, world, a, b)
    }

    #[test]
    fn back_to_back_callers_are_serialized() {
        let (mut engine, mut world, a, b) = setup(10);
        assert_eq!(10, world.bus.schedule(&mut engine, 0, a, 1));
        assert_eq!(20, world.bus.schedule(&mut engine, 0, b, 2));
        engine.run(&mut world);
        assert_eq!(vec![(10, a, 1), (20, b, 2)], world.grants);
        assert_eq!(2, world.bus.stats.transfers);
        assert_eq!(10, world.bus.stats.wait_time);
    }

    #[test]
    fn delayed_request_after_idle_gap_starts_at_its_own_time() {
        let (mut engine, mut world, a, b) = setup(4);
        assert_eq!(4, world.bus.schedule(&mut engine, 0, a, 0));
        assert_eq!(14, world.bus.schedule(&mut engine, 10, b, 0));
        engine.run(&mut world);
        assert_eq!(vec![(4, a, 0), (14, b, 0)], world.grants);
        assert_eq!(0, world.bus.pending());
    }

    #[test]
    fn many_callers_queue_without_limit() {
        let (mut engine, mut world, a, _) = setup(3);
        for tag in 0..50 {
            assert_eq!(3 * (tag + 1), world.bus.schedule(&mut engine, 0, a, tag));
        }
        engine.run(&mut world);
        assert_eq!(50, world.grants.len());
        assert!(world.grants.windows(2).all(|w| w[1].0 - w[0].0 == 3));
    }
}
