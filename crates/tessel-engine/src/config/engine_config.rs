use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool and scheduling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on event workers
    pub max_threads: usize,
    /// Workers kept alive while idle
    pub min_threads: usize,
    /// Consecutive empty passes before a worker exits
    pub idle_passes_before_exit: u32,
    /// Scales how eagerly new workers are spawned for queued work
    pub performance_factor: f64,
    pub command_pass_interval_ms: u64,
    /// Minimum delay between accepted events for new scripts
    pub default_min_event_delay_ms: u64,
    /// Events a script may have waiting before further ones are dropped
    pub max_queued_events: usize,
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: 100,
            min_threads: 2,
            idle_passes_before_exit: 20,
            performance_factor: 1.0,
            command_pass_interval_ms: 50,
            default_min_event_delay_ms: 0,
            max_queued_events: 64,
            notification_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn command_pass_interval(&self) -> Duration {
        Duration::from_millis(self.command_pass_interval_ms.max(1))
    }

    pub fn default_min_event_delay(&self) -> Duration {
        Duration::from_millis(self.default_min_event_delay_ms)
    }
}
