use serde::{Deserialize, Serialize};

/// Where index watermarks are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStoreConfig {
    /// Watermarks live in process memory and are lost on restart.
    Memory,
    /// Watermarks live in the `espipe.espipe_timer` table of the source database.
    #[default]
    Postgres,
}
