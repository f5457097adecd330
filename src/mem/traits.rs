use crate::mem::request::MemoryRequest;
use crate::sim::engine::{Engine, EventHandler, HandlerId};

/// A device that accepts memory requests.
///
/// `access` returns `false` when the request was not admitted; the caller
/// must wait for an `Unstall` message from this device before retrying.
/// Completion is always reported later as an `AccessCompleted` message.
pub trait MemoryPort: EventHandler {
    fn access(&mut self, engine: &mut Engine, request: MemoryRequest, caller: HandlerId) -> bool;

    /// Whether events addressed to `id` belong to this device or one it owns.
    fn handles(&self, id: HandlerId) -> bool;

    fn id(&self) -> HandlerId;

    fn size(&self) -> u64;

    fn block_size(&self) -> u64;

    fn block_address(&self, addr: u64) -> u64 {
        addr - addr % self.block_size()
    }
}

/// Notification sink for clients of a [`MemoryPort`].
pub trait MemoryCallback {
    fn access_completed(&mut self, engine: &mut Engine, request: MemoryRequest, from: HandlerId);

    fn unstall(&mut self, engine: &mut Engine, from: HandlerId);
}

/// Notification sink for clients of a [`crate::mem::Bus`].
pub trait BusCallback {
    fn bus_granted(&mut self, engine: &mut Engine, tag: u64);
}
