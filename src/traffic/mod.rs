pub mod config;
pub mod driver;
pub mod logging;
pub mod patterns;
pub mod trace;

pub use driver::{DriverStats, TrafficDriver};
pub use patterns::TrafficOp;
