pub mod config;
pub mod engine;
pub mod log;
pub mod top;

#[cfg(test)]
mod tests;

pub use config::{RootKind, SimulatorConfig};
pub use engine::{Engine, EngineStats, Event, EventHandler, HandlerId, Message};
pub use top::{RootMemory, SimReport, Simulator};
