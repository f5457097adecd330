use log::info;

use crate::timeq::Cycle;

pub struct TrafficLogger;

impl TrafficLogger {
    pub fn log_start(name: &str, source: &str, limit: Option<u64>) {
        match limit {
            Some(limit) => info!("[TRAFFIC] {} sending {} requests from {}", name, limit, source),
            None => info!("[TRAFFIC] {} replaying {}", name, source),
        }
    }

    pub fn log_checkpoint(name: &str, completed: u64, cycle: Cycle) {
        info!(
            "[TRAFFIC] {} {} requests done at time {:>10}",
            name, completed, cycle
        );
    }

    pub fn log_done(name: &str, completed: u64, cycle: Cycle) {
        info!(
            "[TRAFFIC] {} all done! {} requests by time {}",
            name, completed, cycle
        );
    }
}
