use std::ops::AddAssign;

use serde::Serialize;

use crate::mem::request::AccessKind;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hazard {
    ReadAfterRead,
    ReadAfterWrite,
    WriteAfterRead,
    WriteAfterWrite,
}

impl Hazard {
    /// Classify `later` against an earlier access to the same block.
    pub fn between(earlier: AccessKind, later: AccessKind) -> Self {
        match (earlier.is_write(), later.is_write()) {
            (false, false) => Self::ReadAfterRead,
            (true, false) => Self::ReadAfterWrite,
            (false, true) => Self::WriteAfterRead,
            (true, true) => Self::WriteAfterWrite,
        }
    }

    pub fn serializes(self) -> bool {
        !matches!(self, Self::ReadAfterRead)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BusStats {
    pub transfers: u64,
    pub wait_time: u64,
    pub busy_time: u64,
}

impl BusStats {
    pub fn record_transfer(&mut self, wait: Cycle, latency: Cycle) {
        self.transfers = self.transfers.saturating_add(1);
        self.wait_time = self.wait_time.saturating_add(wait);
        self.busy_time = self.busy_time.saturating_add(latency);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BankStats {
    pub row_buffer_hits: u64,
    pub row_buffer_misses: u64,
    pub opens: u64,
    pub accesses: u64,
    pub closes: u64,
}

impl BankStats {
    pub fn row_buffer_accesses(&self) -> u64 {
        self.row_buffer_hits + self.row_buffer_misses
    }
}

impl AddAssign<&BankStats> for BankStats {
    fn add_assign(&mut self, other: &BankStats) {
        self.row_buffer_hits = self.row_buffer_hits.saturating_add(other.row_buffer_hits);
        self.row_buffer_misses = self.row_buffer_misses.saturating_add(other.row_buffer_misses);
        self.opens = self.opens.saturating_add(other.opens);
        self.accesses = self.accesses.saturating_add(other.accesses);
        self.closes = self.closes.saturating_add(other.closes);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemoryStats {
    pub reads: u64,
    pub writes: u64,
    pub read_queue_time: u64,
    pub write_queue_time: u64,
    pub read_total_time: u64,
    pub write_total_time: u64,
    pub rejections: u64,
    pub queue_stall_time: u64,
    pub num_rars: u64,
    pub num_raws: u64,
    pub num_wars: u64,
    pub num_waws: u64,
    pub max_queue_occupancy: u64,
}

impl MemoryStats {
    pub fn requests(&self) -> u64 {
        self.reads + self.writes
    }

    pub fn record_hazard(&mut self, hazard: Hazard) {
        let counter = match hazard {
            Hazard::ReadAfterRead => &mut self.num_rars,
            Hazard::ReadAfterWrite => &mut self.num_raws,
            Hazard::WriteAfterRead => &mut self.num_wars,
            Hazard::WriteAfterWrite => &mut self.num_waws,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn record_rejection(&mut self) {
        self.rejections = self.rejections.saturating_add(1);
    }

    pub fn record_admission(&mut self, occupancy: usize) {
        self.max_queue_occupancy = self.max_queue_occupancy.max(occupancy as u64);
    }

    pub fn record_dispatch(&mut self, kind: AccessKind, queued: Cycle) {
        if kind.is_write() {
            self.write_queue_time = self.write_queue_time.saturating_add(queued);
        } else {
            self.read_queue_time = self.read_queue_time.saturating_add(queued);
        }
    }

    pub fn record_completion(&mut self, kind: AccessKind, total: Cycle) {
        if kind.is_write() {
            self.writes = self.writes.saturating_add(1);
            self.write_total_time = self.write_total_time.saturating_add(total);
        } else {
            self.reads = self.reads.saturating_add(1);
            self.read_total_time = self.read_total_time.saturating_add(total);
        }
    }

    pub fn record_stall(&mut self, cycles: Cycle) {
        self.queue_stall_time = self.queue_stall_time.saturating_add(cycles);
    }

    pub fn average_read_time(&self) -> f64 {
        ratio(self.read_total_time, self.reads)
    }

    pub fn average_write_time(&self) -> f64 {
        ratio(self.write_total_time, self.writes)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub reads: u64,
    pub writes: u64,
    pub hits: u64,
    pub misses: u64,
    pub dirty_evictions: u64,
    pub writebacks_completed: u64,
    pub rejections: u64,
    pub num_waits_on_data: u64,
    pub num_waits_on_writeback: u64,
    pub read_queue_time: u64,
    pub write_queue_time: u64,
    pub read_tag_access_time: u64,
    pub write_tag_access_time: u64,
    pub dram_critical_read_time: u64,
    pub pcm_critical_read_time: u64,
    pub read_request_time: u64,
    pub write_request_time: u64,
    pub dram_access_time: u64,
    pub pcm_access_time: u64,
    pub dram_stall_time: u64,
    pub pcm_stall_time: u64,
    pub queue_stall_time: u64,
}

impl CacheStats {
    pub fn record_lookup(&mut self, hit: bool, kind: AccessKind, tag_time: Cycle) {
        if hit {
            self.hits = self.hits.saturating_add(1);
        } else {
            self.misses = self.misses.saturating_add(1);
        }
        if kind.is_write() {
            self.write_tag_access_time = self.write_tag_access_time.saturating_add(tag_time);
        } else {
            self.read_tag_access_time = self.read_tag_access_time.saturating_add(tag_time);
        }
    }

    pub fn record_dequeue(&mut self, kind: AccessKind, queued: Cycle) {
        if kind.is_write() {
            self.write_queue_time = self.write_queue_time.saturating_add(queued);
        } else {
            self.read_queue_time = self.read_queue_time.saturating_add(queued);
        }
    }

    pub fn record_completion(&mut self, kind: AccessKind, total: Cycle) {
        if kind.is_write() {
            self.writes = self.writes.saturating_add(1);
            self.write_request_time = self.write_request_time.saturating_add(total);
        } else {
            self.reads = self.reads.saturating_add(1);
            self.read_request_time = self.read_request_time.saturating_add(total);
        }
    }

    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

fn ratio(num: u64, denom: u64) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}
