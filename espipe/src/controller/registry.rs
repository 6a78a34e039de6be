use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::concurrency::cancel::CancelHandle;
use crate::controller::metrics::TaskMetric;
use crate::indexer::TaskOutcome;

/// Kind of work the controller runs for an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Init,
    Sync,
    Fix,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Init => f.write_str("init"),
            TaskKind::Sync => f.write_str("sync"),
            TaskKind::Fix => f.write_str("fix"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct RegisteredTask {
    pub(crate) id: u64,
    pub(crate) cancel: CancelHandle,
    pub(crate) handle: JoinHandle<()>,
}

impl RegisteredTask {
    fn metric(&self, index_name: &str) -> TaskMetric {
        TaskMetric {
            index_name: index_name.to_string(),
            task_id: self.id,
            is_done: self.handle.is_finished(),
            is_cancelled: self.cancel.is_cancelled(),
        }
    }
}

/// The latest outcome of a kind of task, with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedOutcome {
    pub outcome: TaskOutcome,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexOutcomes {
    pub init: Option<RecordedOutcome>,
    pub sync: Option<RecordedOutcome>,
    pub fix: Option<RecordedOutcome>,
}

/// Running tasks keyed by kind and index name.
///
/// At most one task of a kind is registered per index. Fix tasks are never registered.
#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    tasks: BTreeMap<(TaskKind, String), RegisteredTask>,
    outcomes: BTreeMap<String, IndexOutcomes>,
}

impl TaskRegistry {
    pub(crate) fn contains(&self, kind: TaskKind, index_name: &str) -> bool {
        self.tasks.contains_key(&(kind, index_name.to_string()))
    }

    pub(crate) fn register(&mut self, kind: TaskKind, index_name: &str, task: RegisteredTask) {
        self.tasks.insert((kind, index_name.to_string()), task);
    }

    pub(crate) fn remove(&mut self, kind: TaskKind, index_name: &str) -> Option<RegisteredTask> {
        self.tasks.remove(&(kind, index_name.to_string()))
    }

    /// Removes the entry of `index_name` only if it is still the task `task_id`.
    pub(crate) fn remove_if_current(
        &mut self,
        kind: TaskKind,
        index_name: &str,
        task_id: u64,
    ) -> bool {
        let key = (kind, index_name.to_string());
        match self.tasks.get(&key) {
            Some(task) if task.id == task_id => {
                self.tasks.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Removes every task of `kind`.
    pub(crate) fn drain(&mut self, kind: TaskKind) -> Vec<RegisteredTask> {
        let keys: Vec<_> = self
            .tasks
            .keys()
            .filter(|(task_kind, _)| *task_kind == kind)
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| self.tasks.remove(&key))
            .collect()
    }

    pub(crate) fn task_metrics(&self, kind: TaskKind) -> Vec<TaskMetric> {
        self.tasks
            .iter()
            .filter(|((task_kind, _), _)| *task_kind == kind)
            .map(|((_, index_name), task)| task.metric(index_name))
            .collect()
    }

    pub(crate) fn record_outcome(&mut self, kind: TaskKind, index_name: &str, outcome: TaskOutcome) {
        let recorded = Some(RecordedOutcome {
            outcome,
            finished_at: Utc::now(),
        });

        let outcomes = self.outcomes.entry(index_name.to_string()).or_default();
        match kind {
            TaskKind::Init => outcomes.init = recorded,
            TaskKind::Sync => outcomes.sync = recorded,
            TaskKind::Fix => outcomes.fix = recorded,
        }
    }

    pub(crate) fn outcomes(&self) -> BTreeMap<String, IndexOutcomes> {
        self.outcomes.clone()
    }
}
