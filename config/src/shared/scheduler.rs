use serde::{Deserialize, Serialize};

/// Periodic re-admission of sync tasks for every configured index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl SchedulerConfig {
    pub const DEFAULT_INTERVAL_MS: u64 = 30_000;
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    SchedulerConfig::DEFAULT_INTERVAL_MS
}
