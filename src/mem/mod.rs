pub mod bank;
pub mod bus;
pub mod cache_memory;
pub mod cache_model;
pub mod config;
pub mod mapping;
pub mod memory;
pub mod request;
pub mod staller;
pub mod stats;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::Bus;
pub use cache_memory::CacheMemory;
pub use cache_model::{CacheModel, CacheOutcome, Victim};
pub use config::{CacheConfig, MappingKind, MemoryConfig, ReplacementPolicy, RowBufferPolicy};
pub use mapping::{Coordinates, MemoryMapping};
pub use memory::Memory;
pub use request::{AccessKind, MemoryRequest, RequestId, RequestSeq};
pub use staller::Staller;
pub use traits::{BusCallback, MemoryCallback, MemoryPort};
