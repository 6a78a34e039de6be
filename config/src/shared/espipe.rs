use std::path::PathBuf;

use serde::Deserialize;

use crate::index::FieldsMode;
use crate::load::Config;
use crate::shared::{
    BatchConfig, CheckpointStoreConfig, ElasticsearchConfig, PgConnectionConfig, SchedulerConfig,
    ServerConfig, SyncConfig, ValidationError, WorkerConfig,
};

/// Root configuration of the espipe service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EspipeConfig {
    /// Database the index queries run against.
    pub source: PgConnectionConfig,
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub checkpoint_store: CheckpointStoreConfig,
    /// Root of the per-index configuration directories.
    #[serde(default = "default_indices_dir")]
    pub indices_dir: PathBuf,
    /// Extension mode used by indices whose `sql.properties` does not set one.
    #[serde(default)]
    pub default_fields_mode: FieldsMode,
    #[serde(default)]
    pub server: ServerConfig,
}

impl EspipeConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.elasticsearch.validate()?;
        self.batch.validate()?;
        self.sync.validate()?;
        self.workers.validate()?;

        Ok(())
    }
}

impl Config for EspipeConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

fn default_indices_dir() -> PathBuf {
    PathBuf::from("espipe/es")
}
