use std::fmt;

use serde::Serialize;

/// How a run of an indexing algorithm ended.
///
/// Failures are reported through the `Err` side of the returned result; `Failed` only
/// exists so the controller can record them next to the other outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed {
        documents: usize,
        batches: usize,
        failed_items: usize,
    },
    /// A precondition did not hold and nothing was written.
    Skipped { reason: String },
    Cancelled,
    Failed { error: String },
}

impl TaskOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        TaskOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed {
                documents,
                batches,
                failed_items,
            } => write!(
                f,
                "completed, {documents} documents in {batches} batches, {failed_items} failed"
            ),
            TaskOutcome::Skipped { reason } => write!(f, "skipped, {reason}"),
            TaskOutcome::Cancelled => f.write_str("cancelled"),
            TaskOutcome::Failed { error } => write!(f, "failed, {error}"),
        }
    }
}
