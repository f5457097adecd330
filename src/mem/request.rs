use crate::sim::engine::HandlerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    InstrFetch,
}

impl AccessKind {
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }

    /// Two accesses to the same block must be ordered unless both read.
    pub fn conflicts_with(self, other: AccessKind) -> bool {
        self.is_write() || other.is_write()
    }
}

/// Stable identity of a request: the handler that created it plus a
/// per-origin sequence number. Never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId {
    pub origin: HandlerId,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequest {
    pub id: RequestId,
    pub addr: u64,
    pub kind: AccessKind,
}

impl MemoryRequest {
    pub fn new(id: RequestId, addr: u64, kind: AccessKind) -> Self {
        Self { id, addr, kind }
    }

    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }
}

/// Hands out request ids for one origin.
#[derive(Debug, Clone)]
pub struct RequestSeq {
    origin: HandlerId,
    next: u64,
}

impl RequestSeq {
    pub fn new(origin: HandlerId) -> Self {
        Self { origin, next: 0 }
    }

    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId {
            origin: self.origin,
            seq: self.next,
        };
        self.next += 1;
        id
    }

    pub fn request(&mut self, addr: u64, kind: AccessKind) -> MemoryRequest {
        MemoryRequest::new(self.next_id(), addr, kind)
    }
}
