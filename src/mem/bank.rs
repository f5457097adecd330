use crate::mem::config::{MemoryConfig, RowBufferPolicy};
use crate::mem::request::RequestId;
use crate::mem::stats::BankStats;
use crate::timeq::{Cycle, Ticket, TimedServer};

/// One bank: serves dispatched requests one at a time in FIFO order and
/// charges row-buffer dependent latency.
#[derive(Debug)]
pub struct Bank {
    policy: RowBufferPolicy,
    open_latency: Cycle,
    close_latency: Cycle,
    access_latency: Cycle,
    long_close_latency: bool,
    open_row: Option<u64>,
    server: TimedServer<RequestId>,
    pub stats: BankStats,
}

impl Bank {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            policy: config.row_buffer_policy,
            open_latency: config.open_latency,
            close_latency: config.close_latency,
            access_latency: config.access_latency,
            long_close_latency: config.long_close_latency,
            open_row: None,
            server: TimedServer::new(),
            stats: BankStats::default(),
        }
    }

    /// Queue `request` against `row`. Row state advances in enqueue order,
    /// which is also service order.
    pub fn enqueue(&mut self, now: Cycle, row: u64, request: RequestId) -> Ticket {
        let (service, recovery) = self.timing_for(row);
        self.server
            .reserve_with_recovery(now, now, service, recovery, request)
    }

    pub fn pop_ready(&mut self, now: Cycle) -> Option<RequestId> {
        self.server.pop_ready(now).map(|result| result.payload)
    }

    pub fn open_row(&self) -> Option<u64> {
        self.open_row
    }

    pub fn outstanding(&self) -> usize {
        self.server.outstanding()
    }

    fn timing_for(&mut self, row: u64) -> (Cycle, Cycle) {
        self.stats.accesses += 1;
        match self.policy {
            RowBufferPolicy::OpenPage => match self.open_row {
                Some(open) if open == row => {
                    self.stats.row_buffer_hits += 1;
                    (self.access_latency, 0)
                }
                Some(_) => {
                    self.stats.row_buffer_misses += 1;
                    self.stats.closes += 1;
                    self.stats.opens += 1;
                    self.open_row = Some(row);
                    (self.close_latency + self.open_latency + self.access_latency, 0)
                }
                None => {
                    self.stats.row_buffer_misses += 1;
                    self.stats.opens += 1;
                    self.open_row = Some(row);
                    (self.open_latency + self.access_latency, 0)
                }
            },
            RowBufferPolicy::ClosePage => {
                self.stats.row_buffer_misses += 1;
                self.stats.opens += 1;
                self.stats.closes += 1;
                let base = self.open_latency + self.access_latency;
                if self.long_close_latency {
                    (base + self.close_latency, 0)
                } else {
                    (base, self.close_latency)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::request::RequestSeq;
    use crate::sim::config::EngineConfig;
    use crate::sim::engine::Engine;

    fn ids(n: usize) -> Vec<RequestId> {
        let mut engine = Engine::new(&EngineConfig::default());
        let mut seq = RequestSeq::new(engine.register("t"));
        (0..n).map(|_| seq.next_id()).collect()
    }

    fn config(policy: RowBufferPolicy, long_close: bool) -> MemoryConfig {
        MemoryConfig {
            row_buffer_policy: policy,
            open_latency: 10,
            close_latency: 20,
            access_latency: 5,
            long_close_latency: long_close,
            ..MemoryConfig::dram()
        }
    }

    #[test]
    fn open_page_distinguishes_hits_and_misses() {
        let ids = ids(3);
        let mut bank = Bank::new(&config(RowBufferPolicy::OpenPage, false));
        let first = bank.enqueue(0, 7, ids[0]);
        assert_eq!(15, first.ready_at());
        let hit = bank.enqueue(0, 7, ids[1]);
        assert_eq!(20, hit.ready_at());
        let conflict = bank.enqueue(0, 8, ids[2]);
        assert_eq!(20 + 20 + 10 + 5, conflict.ready_at());
        assert_eq!(1, bank.stats.row_buffer_hits);
        assert_eq!(2, bank.stats.row_buffer_misses);
        assert_eq!(Some(8), bank.open_row());
    }

    #[test]
    fn close_page_pays_uniform_latency() {
        let ids = ids(2);
        let mut bank = Bank::new(&config(RowBufferPolicy::ClosePage, false));
        let a = bank.enqueue(0, 1, ids[0]);
        let b = bank.enqueue(0, 1, ids[1]);
        assert_eq!(15, a.ready_at());
        // the close after `a` keeps the bank busy but is off the critical path of `a`
        assert_eq!(35, b.start_at());
        assert_eq!(50, b.ready_at());
        assert_eq!(None, bank.open_row());
    }

    #[test]
    fn long_close_latency_is_on_the_critical_path() {
        let ids = ids(1);
        let mut bank = Bank::new(&config(RowBufferPolicy::ClosePage, true));
        assert_eq!(35, bank.enqueue(0, 1, ids[0]).ready_at());
    }

    #[test]
    fn requests_leave_in_fifo_order() {
        let ids = ids(2);
        let mut bank = Bank::new(&config(RowBufferPolicy::OpenPage, false));
        bank.enqueue(0, 1, ids[0]);
        let last = bank.enqueue(0, 1, ids[1]);
        assert_eq!(Some(ids[0]), bank.pop_ready(last.ready_at()));
        assert_eq!(Some(ids[1]), bank.pop_ready(last.ready_at()));
        assert_eq!(0, bank.outstanding());
    }
}
