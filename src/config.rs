//! Runtime configuration and logging setup.

use std::time::Duration;

/// Settings for an [`AssetRegistry`](crate::resources::AssetRegistry).
///
/// `workers == 0` loads every asset inline on the calling thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub workers: usize,
    /// How long an idle worker sleeps before looking at the queue again.
    pub poll_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl RegistryConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Install `env_logger` as the `log` backend. Filter with `RUST_LOG`.
///
/// Safe to call more than once; later calls only warn.
pub fn init_logging() {
    if let Err(e) = env_logger::try_init() {
        log::warn!("Logger already initialized: {}", e);
    }
}
