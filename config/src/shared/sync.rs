use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// When a sync cycle persists its new watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPolicy {
    /// Save the new watermark before streaming the window. A crash mid-cycle skips
    /// the unfinished window on restart.
    #[default]
    SaveBeforeSync,
    /// Save the new watermark once the bulk write of the window has been awaited. A
    /// crash mid-cycle replays the window on restart.
    SaveAfterSync,
}

/// Scheduling of the periodic sync task registered for each index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Delay before the first run of a newly admitted sync task.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Delay between the end of a run and the start of the next one.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    #[serde(default)]
    pub watermark_policy: WatermarkPolicy,
}

impl SyncConfig {
    pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

    pub const DEFAULT_PERIOD_MS: u64 = 5000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.period_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "sync.period_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            period_ms: default_period_ms(),
            watermark_policy: WatermarkPolicy::default(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    SyncConfig::DEFAULT_INITIAL_DELAY_MS
}

fn default_period_ms() -> u64 {
    SyncConfig::DEFAULT_PERIOD_MS
}
