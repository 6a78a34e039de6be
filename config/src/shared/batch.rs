use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batch sizing for bulk writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Number of streamed rows after which init flushes a bulk request.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
}

impl BatchConfig {
    pub const DEFAULT_MAX_SIZE: usize = 10000;

    /// Upper bound on the documents buffered for one bulk request.
    pub const MAX_SIZE_LIMIT: usize = u16::MAX as usize;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 || self.max_size > Self::MAX_SIZE_LIMIT {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_size".to_string(),
                constraint: format!("must be between 1 and {}", Self::MAX_SIZE_LIMIT),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}
