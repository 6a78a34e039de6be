use std::collections::BTreeMap;

use serde::Serialize;

use crate::controller::registry::IndexOutcomes;
use crate::source::StreamMetrics;
use crate::store::ConnectionPoolMetrics;
use crate::workers::PoolMetrics;

/// A registered task as seen by [`ControllerMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskMetric {
    pub index_name: String,
    pub task_id: u64,
    pub is_done: bool,
    pub is_cancelled: bool,
}

/// Snapshot of the controller state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerMetrics {
    pub init_tasks: Vec<TaskMetric>,
    pub sync_tasks: Vec<TaskMetric>,
    pub init_pool: PoolMetrics,
    pub sync_pool: PoolMetrics,
    pub last_outcomes: BTreeMap<String, IndexOutcomes>,
    pub source: SourceMetrics,
}

/// Connections held against the relational source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMetrics {
    pub streams: StreamMetrics,
    /// `None` when the checkpoint store is not backed by a pool.
    pub checkpoint_pool: Option<ConnectionPoolMetrics>,
}
