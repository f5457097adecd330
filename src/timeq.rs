/*
Time-queue primitives for the memory timing model.

A shared resource (a bus, a bank) is wrapped by a TimedServer, which serves reservations one at a
time in arrival order.  Each reservation occupies the server for a caller-supplied service time,
starting no earlier than the requested instant and no earlier than the end of the previous
reservation, so committed windows never overlap.

The server never rejects work: capacity limits are the business of whoever feeds it.  Accepted
reservations yield a `Ticket` describing when service starts and when it completes; the owner
schedules an engine event at `ready_at` and pops the finished payload with `pop_ready`.
*/

use std::collections::VecDeque;

pub type Cycle = u64;

// Result of reserving a slot on a timed server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Cycle,
    start_at: Cycle,
    ready_at: Cycle,
}

impl Ticket {
    fn new(issued_at: Cycle, start_at: Cycle, ready_at: Cycle) -> Self {
        Self {
            issued_at,
            start_at,
            ready_at,
        }
    }

    // Cycle at which the reservation was made.
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    // Cycle at which the server starts working on the reservation.
    pub fn start_at(&self) -> Cycle {
        self.start_at
    }

    // Cycle at which the server releases the payload.
    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    // Cycles spent waiting for the server to become free.
    pub fn wait_cycles(&self) -> Cycle {
        self.start_at.saturating_sub(self.issued_at)
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

#[derive(Debug)]
struct Inflight<T> {
    payload: T,
    ticket: Ticket,
}

// Single-lane server that hands out non-overlapping [start, ready) windows in FIFO order.
#[derive(Debug)]
pub struct TimedServer<T> {
    inflight: VecDeque<Inflight<T>>,
    busy_until: Cycle,
}

impl<T> Default for TimedServer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimedServer<T> {
    pub fn new() -> Self {
        Self {
            inflight: VecDeque::new(),
            busy_until: 0,
        }
    }

    // Reserve `service` cycles starting no earlier than `earliest`.
    pub fn reserve(&mut self, now: Cycle, earliest: Cycle, service: Cycle, payload: T) -> Ticket {
        self.reserve_with_recovery(now, earliest, service, 0, payload)
    }

    // Like `reserve`, but the server stays busy for `recovery` cycles after releasing the payload.
    pub fn reserve_with_recovery(
        &mut self,
        now: Cycle,
        earliest: Cycle,
        service: Cycle,
        recovery: Cycle,
        payload: T,
    ) -> Ticket {
        debug_assert!(earliest >= now, "reservation cannot start in the past");
        let start_at = self.busy_until.max(earliest);
        let ready_at = start_at.saturating_add(service);
        let ticket = Ticket::new(now, start_at, ready_at);

        self.busy_until = ready_at.saturating_add(recovery);
        self.inflight.push_back(Inflight { payload, ticket });
        ticket
    }

    // Pop the oldest reservation if it has completed by `now`.
    pub fn pop_ready(&mut self, now: Cycle) -> Option<ServiceResult<T>> {
        if !self.inflight.front()?.ticket.is_ready(now) {
            return None;
        }
        let inflight = self.inflight.pop_front()?;
        Some(ServiceResult {
            payload: inflight.payload,
            ticket: inflight.ticket,
        })
    }

    pub fn peek_ready(&self, now: Cycle) -> Option<&T> {
        self.inflight
            .front()
            .filter(|inflight| inflight.ticket.is_ready(now))
            .map(|inflight| &inflight.payload)
    }

    // Returns the earliest cycle at which a new reservation could begin service.
    pub fn available_at(&self) -> Cycle {
        self.busy_until
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.is_empty()
    }
}
