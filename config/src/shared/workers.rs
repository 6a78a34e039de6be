use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Sizing of the init and sync worker pools.
///
/// Unset sizes are derived from the available parallelism: init work is bursty and
/// parallel across indices so its pool is larger than the periodic sync pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    #[serde(default)]
    pub init_workers: Option<usize>,
    #[serde(default)]
    pub sync_workers: Option<usize>,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("workers.init_workers", self.init_workers),
            ("workers.sync_workers", self.sync_workers),
        ] {
            if value == Some(0) {
                return Err(ValidationError::InvalidFieldValue {
                    field: field.to_string(),
                    constraint: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn init_workers(&self) -> usize {
        self.init_workers.unwrap_or_else(|| available_cpus() / 5 + 3)
    }

    pub fn sync_workers(&self) -> usize {
        self.sync_workers.unwrap_or_else(|| available_cpus() / 5 + 1)
    }
}

fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
