//! Runtime configuration.
//!
//! Device descriptors are built in code; this module only carries the tunables
//! of the bus substrate and the monitor loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serial bus client tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Time to wait for the bus task to acknowledge one transfer
    pub transaction_timeout_ms: u64,
    /// Pause between hardware mutex acquisition attempts
    pub mutex_retry_delay_us: u64,
    /// Depth of the bus task's request queue
    pub queue_depth: usize,
}

impl BusConfig {
    /// Settings for tests and simulation: short timeouts, no retry pause.
    pub fn fast() -> Self {
        Self {
            transaction_timeout_ms: 50,
            mutex_retry_delay_us: 0,
            queue_depth: 8,
        }
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn mutex_retry_delay(&self) -> Duration {
        Duration::from_micros(self.mutex_retry_delay_us)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: 20,
            mutex_retry_delay_us: 100,
            queue_depth: 16,
        }
    }
}

/// Polling loop settings for the `pwr-monitor` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub bus: BusConfig,
    /// Interval between tuple polls
    pub poll_interval_ms: u64,
    /// Number of poll iterations; zero runs until interrupted
    pub iterations: u32,
    /// Emit each poll as a JSON line instead of log events
    pub json: bool,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            poll_interval_ms: 100,
            iterations: 10,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_from_config() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.transaction_timeout(), Duration::from_millis(20));
        assert_eq!(cfg.mutex_retry_delay(), Duration::from_micros(100));
    }

    #[test]
    fn monitor_config_round_trips_through_json() {
        let cfg = MonitorConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MonitorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
