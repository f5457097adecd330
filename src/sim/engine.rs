//! Global discrete-event scheduler.
//!
//! The engine owns the simulation clock and dispatches [`Event`]s to a single
//! top-level [`EventHandler`], which routes them to the component named by
//! the event's [`HandlerId`]. Events that share a timestamp always execute in
//! the order in which they were scheduled, including events scheduled while
//! that timestamp is being processed.
//!
//! Near-term events (`delay < NEAR_SPAN`) are kept in a small ring of FIFO
//! buckets indexed by `timestamp % NEAR_SPAN`. Every event in the ring has a
//! timestamp in `[now, now + NEAR_SPAN)`, so each bucket holds exactly one
//! timestamp. Longer delays go to a binary heap ordered by
//! `(timestamp, sequence)`. Heap events for a given timestamp were always
//! scheduled before any ring event for that timestamp, so they run first.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use log::{info, warn};
use serde::Serialize;

use crate::mem::request::MemoryRequest;
use crate::sim::config::EngineConfig;
use crate::timeq::Cycle;

/// Span of the near-term ring; the largest delay it absorbs is `NEAR_SPAN - 1`.
pub const NEAR_SPAN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandlerId(u32);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Component-private wakeup; the tag is opaque to the engine.
    Wake(u64),
    /// A bus slot reserved with `tag` has finished.
    BusGranted(u64),
    /// `from` finished serving `request`.
    AccessCompleted { request: MemoryRequest, from: HandlerId },
    /// `from` freed queue space; the receiver may retry a rejected access.
    Unstall { from: HandlerId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    timestamp: Cycle,
    handler: HandlerId,
    message: Message,
}

impl Event {
    pub fn timestamp(&self) -> Cycle {
        self.timestamp
    }

    pub fn handler(&self) -> HandlerId {
        self.handler
    }

    pub fn message(&self) -> Message {
        self.message
    }
}

/// Anything the engine can dispatch to.
pub trait EventHandler {
    fn process(&mut self, engine: &mut Engine, event: Event);

    /// Statistics snapshot handed to the stats sink on every flush.
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Destination of periodic statistics flushes.
pub trait StatsSink {
    fn flush(&mut self, interval: u64, timestamp: Cycle, snapshot: serde_json::Value) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct NullSink;

impl StatsSink for NullSink {
    fn flush(&mut self, _interval: u64, _timestamp: Cycle, _snapshot: serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes one JSON object per flush.
pub struct JsonLinesSink {
    out: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("cannot create stats file {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl StatsSink for JsonLinesSink {
    fn flush(&mut self, interval: u64, timestamp: Cycle, snapshot: serde_json::Value) -> anyhow::Result<()> {
        let line = serde_json::json!({
            "interval": interval,
            "timestamp": timestamp,
            "stats": snapshot,
        });
        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStats {
    pub final_timestamp: Cycle,
    pub total_events: u64,
    pub execution_secs: f64,
    pub event_rate: f64,
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    event: Event,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        (self.event.timestamp, self.seq) == (other.event.timestamp, other.seq)
    }
}

impl Eq for Pending {}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.event.timestamp, self.seq).cmp(&(other.event.timestamp, other.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Engine {
    events: BinaryHeap<Reverse<Pending>>,
    near: [VecDeque<Event>; NEAR_SPAN],
    seq: u64,

    handlers: Vec<String>,
    sink: Box<dyn StatsSink>,
    stats_period: u64,
    progress_period: u64,
    current_interval: u64,
    stats_next: Cycle,
    progress_next: Cycle,

    done: bool,
    timestamp: Cycle,
    last_progress_timestamp: Cycle,
    num_events: u64,
    last_num_events: u64,
    last_progress: Option<Instant>,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            events: BinaryHeap::new(),
            near: Default::default(),
            seq: 0,
            handlers: Vec::new(),
            sink: Box::new(NullSink),
            stats_period: config.stats_period,
            progress_period: config.progress_period,
            current_interval: 0,
            stats_next: config.stats_period,
            progress_next: config.progress_period,
            done: false,
            timestamp: 0,
            last_progress_timestamp: 0,
            num_events: 0,
            last_num_events: 0,
            last_progress: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn StatsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Allocate a dispatch target.
    pub fn register(&mut self, name: impl Into<String>) -> HandlerId {
        let id = HandlerId(self.handlers.len() as u32);
        self.handlers.push(name.into());
        id
    }

    pub fn handler_name(&self, id: HandlerId) -> &str {
        self.handlers
            .get(id.0 as usize)
            .map(String::as_str)
            .unwrap_or("<unregistered>")
    }

    pub fn now(&self) -> Cycle {
        self.timestamp
    }

    /// Whether per-request tracing is enabled for a component starting at `debug_start`.
    pub fn traced(&self, debug_start: Option<Cycle>) -> bool {
        debug_start.is_some_and(|start| self.timestamp >= start)
    }

    pub fn add_event(&mut self, delay: Cycle, handler: HandlerId, message: Message) {
        let timestamp = self
            .timestamp
            .checked_add(delay)
            .expect("event timestamp overflow");
        let event = Event {
            timestamp,
            handler,
            message,
        };
        if delay < NEAR_SPAN as Cycle {
            self.near[timestamp as usize % NEAR_SPAN].push_back(event);
        } else {
            let seq = self.seq;
            self.seq += 1;
            self.events.push(Reverse(Pending { seq, event }));
        }
    }

    pub fn add_event_at(&mut self, timestamp: Cycle, handler: HandlerId, message: Message) {
        assert!(
            timestamp >= self.timestamp,
            "cannot schedule {} at {} before current time {}",
            self.handler_name(handler),
            timestamp,
            self.timestamp
        );
        self.add_event(timestamp - self.timestamp, handler, message);
    }

    /// Stop dispatching once the events of the current timestamp have run.
    pub fn quit(&mut self) {
        self.done = true;
    }

    pub fn pending_events(&self) -> usize {
        self.events.len() + self.near.iter().map(VecDeque::len).sum::<usize>()
    }

    fn next_timestamp(&self) -> Option<Cycle> {
        let near = self
            .near
            .iter()
            .filter_map(|bucket| bucket.front().map(Event::timestamp))
            .min();
        let far = self.events.peek().map(|Reverse(pending)| pending.event.timestamp);
        match (near, far) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn run<W: EventHandler>(&mut self, world: &mut W) -> EngineStats {
        let start = Instant::now();
        self.last_progress = Some(start);

        while !self.done {
            let Some(next) = self.next_timestamp() else {
                break;
            };
            assert!(next >= self.timestamp, "clock moved backwards");
            self.timestamp = next;
            self.report(world);

            while self
                .events
                .peek()
                .is_some_and(|Reverse(pending)| pending.event.timestamp == next)
            {
                let Some(Reverse(pending)) = self.events.pop() else {
                    break;
                };
                self.num_events += 1;
                world.process(self, pending.event);
            }

            let slot = next as usize % NEAR_SPAN;
            while let Some(event) = self.near[slot].pop_front() {
                debug_assert_eq!(next, event.timestamp);
                self.num_events += 1;
                world.process(self, event);
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        self.flush(world);
        let stats = EngineStats {
            final_timestamp: self.timestamp,
            total_events: self.num_events,
            execution_secs: elapsed,
            event_rate: if elapsed > 0.0 {
                self.num_events as f64 / elapsed
            } else {
                0.0
            },
        };
        info!(
            "simulation finished at {} after {} events ({:.0} events/s)",
            stats.final_timestamp, stats.total_events, stats.event_rate
        );
        stats
    }

    fn report<W: EventHandler>(&mut self, world: &W) {
        if self.stats_period > 0 {
            while self.timestamp >= self.stats_next {
                self.flush(world);
                self.stats_next = self.stats_next.saturating_add(self.stats_period);
            }
        }
        if self.progress_period > 0 && self.timestamp >= self.progress_next {
            let now = Instant::now();
            let secs = self
                .last_progress
                .map(|last| now.duration_since(last).as_secs_f64())
                .unwrap_or(0.0);
            let events = self.num_events - self.last_num_events;
            let rate = if secs > 0.0 { events as f64 / secs } else { 0.0 };
            info!(
                "progress: timestamp {:>12} (+{}), {} events ({:.0} events/s)",
                self.timestamp,
                self.timestamp - self.last_progress_timestamp,
                self.num_events,
                rate
            );
            self.last_progress = Some(now);
            self.last_num_events = self.num_events;
            self.last_progress_timestamp = self.timestamp;
            while self.timestamp >= self.progress_next {
                self.progress_next = self.progress_next.saturating_add(self.progress_period);
            }
        }
    }

    fn flush<W: EventHandler>(&mut self, world: &W) {
        let interval = self.current_interval;
        self.current_interval += 1;
        if let Err(err) = self.sink.flush(interval, self.timestamp, world.snapshot()) {
            warn!("failed to write statistics for interval {}: {:#}", interval, err);
        }
    }
}
