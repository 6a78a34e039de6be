//! Admission, execution and cancellation of indexing tasks.
//!
//! The [`TaskController`] is constructed once and shared by the scheduler and the control
//! surface. Its registry enforces that an index has at most one init and one sync task,
//! and that init and sync never run together for the same index.

mod metrics;
mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use config::index::{IndexConfig, IndexConfigs};
use config::shared::SyncConfig;
use tokio::sync::Mutex;
use tracing::{error, info};

pub use metrics::{ControllerMetrics, SourceMetrics, TaskMetric};
pub use registry::{IndexOutcomes, RecordedOutcome, TaskKind};

use crate::bail;
use crate::concurrency::cancel::{CancelToken, create_cancel_pair};
use crate::controller::registry::{RegisteredTask, TaskRegistry};
use crate::destination::BulkGateway;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::indexer::{FixRequest, Indexer, TaskOutcome};
use crate::source::RowSource;
use crate::store::CheckpointStore;
use crate::workers::WorkerPool;

struct Inner<S, G, C> {
    indexer: Indexer<S, G, C>,
    indices: IndexConfigs,
    sync_config: SyncConfig,
    init_pool: WorkerPool,
    sync_pool: WorkerPool,
    registry: Mutex<TaskRegistry>,
    next_task_id: AtomicU64,
}

/// Entry point for starting and stopping indexing tasks.
///
/// Start and stop operations return a human readable message describing what was done.
/// They only touch the registry and never wait for i/o.
pub struct TaskController<S, G, C> {
    inner: Arc<Inner<S, G, C>>,
}

impl<S, G, C> Clone for TaskController<S, G, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, G, C> TaskController<S, G, C>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    pub fn new(
        indexer: Indexer<S, G, C>,
        indices: IndexConfigs,
        sync_config: SyncConfig,
        init_pool: WorkerPool,
        sync_pool: WorkerPool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                indexer,
                indices,
                sync_config,
                init_pool,
                sync_pool,
                registry: Mutex::new(TaskRegistry::default()),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn indices(&self) -> &IndexConfigs {
        &self.inner.indices
    }

    /// Starts an init of every configured index.
    pub async fn start_init_all(&self) -> Vec<String> {
        let mut messages = Vec::with_capacity(self.inner.indices.len());
        for index_name in self.inner.indices.names() {
            messages.push(self.start_init(index_name).await);
        }

        messages
    }

    /// Starts an init of `index_name`, replacing its sync task if one is registered.
    ///
    /// Refused while another init of the same index is registered.
    pub async fn start_init(&self, index_name: &str) -> String {
        let Some(index) = self.inner.indices.get(index_name) else {
            return not_configured(index_name);
        };

        let mut registry = self.inner.registry.lock().await;
        if registry.contains(TaskKind::Init, index_name) {
            return log_message(format!(
                "Index {index_name} is in init progress, please stop it manually."
            ));
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(sync) = registry.remove(TaskKind::Sync, index_name) {
            sync.cancel.cancel();
            messages.push(log_message(format!(
                "Remove index {index_name} from sync in progress"
            )));
        }

        let (cancel, token) = create_cancel_pair();
        let task_id = self.next_task_id();
        let controller = self.clone();
        let index = index.clone();
        let handle = tokio::spawn(async move {
            controller.run_init(index, token, task_id).await;
        });

        registry.register(
            TaskKind::Init,
            index_name,
            RegisteredTask {
                id: task_id,
                cancel,
                handle,
            },
        );

        messages.push(log_message(format!("Init index {index_name} is in progress")));
        messages.join("; ")
    }

    /// Re-indexes the rows of `index_name` matching `request` and waits for the result.
    ///
    /// Runs on the init pool regardless of the tasks registered for the index.
    pub async fn start_fix(&self, index_name: &str, request: FixRequest) -> EtlResult<TaskOutcome> {
        let Some(index) = self.inner.indices.get(index_name) else {
            bail!(
                ErrorKind::InvalidArgument,
                "Unknown index",
                format!("index {index_name} is not configured")
            );
        };

        info!(index_name, ?request, "starting fix task");

        let indexer = self.inner.indexer.clone();
        let index = index.clone();
        let handle = self.inner.init_pool.spawn(async move {
            indexer.fix(&index, &request, &CancelToken::never()).await
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(err) => Err(etl_error!(ErrorKind::WorkerPanic, "Fix task failed", err)),
        };

        let mut registry = self.inner.registry.lock().await;
        match &result {
            Ok(outcome) => registry.record_outcome(TaskKind::Fix, index_name, outcome.clone()),
            Err(err) => registry.record_outcome(TaskKind::Fix, index_name, failed(err)),
        }

        result
    }

    pub async fn stop_init_all(&self) -> String {
        self.stop_all(TaskKind::Init).await;
        log_message("Shutdown all init".to_string())
    }

    pub async fn stop_init(&self, index_name: &str) -> String {
        self.stop(TaskKind::Init, index_name).await
    }

    /// Starts the periodic sync of every configured index.
    pub async fn start_sync_all(&self) -> Vec<String> {
        let mut messages = Vec::with_capacity(self.inner.indices.len());
        for index_name in self.inner.indices.names() {
            messages.push(self.start_sync(index_name).await);
        }

        messages
    }

    /// Registers a periodic sync of `index_name`.
    ///
    /// Refused while an init or another sync of the same index is registered.
    pub async fn start_sync(&self, index_name: &str) -> String {
        let Some(index) = self.inner.indices.get(index_name) else {
            return not_configured(index_name);
        };

        let mut registry = self.inner.registry.lock().await;
        if registry.contains(TaskKind::Init, index_name) {
            return log_message(format!("Index {index_name} is in init progress, skip sync."));
        }
        if registry.contains(TaskKind::Sync, index_name) {
            return log_message(format!("Index {index_name} is in sync progress, skip sync."));
        }

        let (cancel, token) = create_cancel_pair();
        let task_id = self.next_task_id();
        let controller = self.clone();
        let index = index.clone();
        let handle = tokio::spawn(async move {
            controller.run_sync_loop(index, token, task_id).await;
        });

        registry.register(
            TaskKind::Sync,
            index_name,
            RegisteredTask {
                id: task_id,
                cancel,
                handle,
            },
        );

        log_message(format!("Sync index {index_name} is in progress"))
    }

    pub async fn stop_sync_all(&self) -> String {
        self.stop_all(TaskKind::Sync).await;
        log_message("Shutdown all sync".to_string())
    }

    pub async fn stop_sync(&self, index_name: &str) -> String {
        self.stop(TaskKind::Sync, index_name).await
    }

    pub async fn metrics(&self) -> ControllerMetrics {
        let registry = self.inner.registry.lock().await;

        ControllerMetrics {
            init_tasks: registry.task_metrics(TaskKind::Init),
            sync_tasks: registry.task_metrics(TaskKind::Sync),
            init_pool: self.inner.init_pool.metrics(),
            sync_pool: self.inner.sync_pool.metrics(),
            last_outcomes: registry.outcomes(),
            source: SourceMetrics {
                streams: self.inner.indexer.source().stream_metrics(),
                checkpoint_pool: self.inner.indexer.store().pool_metrics(),
            },
        }
    }

    /// Stops every init and sync task and waits for them to wind down.
    pub async fn shutdown(&self) {
        info!("shutting down task controller");

        let mut tasks = self.stop_all(TaskKind::Init).await;
        tasks.extend(self.stop_all(TaskKind::Sync).await);

        for task in tasks {
            if let Err(err) = task.handle.await {
                error!(task_id = task.id, error = %err, "task failed while shutting down");
            }
        }
    }

    async fn stop(&self, kind: TaskKind, index_name: &str) -> String {
        let removed = self.inner.registry.lock().await.remove(kind, index_name);

        match removed {
            Some(task) => {
                task.cancel.cancel();
                log_message(format!("Remove index {index_name} from {kind} in progress"))
            }
            None => log_message(format!("Index {index_name} is not in {kind} in progress")),
        }
    }

    async fn stop_all(&self, kind: TaskKind) -> Vec<RegisteredTask> {
        let tasks = self.inner.registry.lock().await.drain(kind);
        for task in &tasks {
            task.cancel.cancel();
        }

        tasks
    }

    fn next_task_id(&self) -> u64 {
        self.inner.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn run_init(self, index: IndexConfig, token: CancelToken, task_id: u64) {
        let indexer = &self.inner.indexer;
        let outcome = token
            .run(self.inner.init_pool.run(indexer.init(&index, &token)))
            .await
            .unwrap_or(Ok(TaskOutcome::Cancelled));
        let outcome = settle(TaskKind::Init, &index.name, outcome);

        let mut registry = self.inner.registry.lock().await;
        registry.remove_if_current(TaskKind::Init, &index.name, task_id);
        registry.record_outcome(TaskKind::Init, &index.name, outcome);
    }

    /// Runs sync after the initial delay, then again after every period, until cancelled.
    async fn run_sync_loop(self, index: IndexConfig, token: CancelToken, task_id: u64) {
        let initial_delay = Duration::from_millis(self.inner.sync_config.initial_delay_ms);
        let period = Duration::from_millis(self.inner.sync_config.period_ms);
        let indexer = &self.inner.indexer;

        let mut delay = initial_delay;
        while token.run(tokio::time::sleep(delay)).await.is_some() {
            delay = period;

            let outcome = token
                .run(self.inner.sync_pool.run(indexer.sync(&index, &token)))
                .await
                .unwrap_or(Ok(TaskOutcome::Cancelled));
            let outcome = settle(TaskKind::Sync, &index.name, outcome);

            let cancelled = outcome == TaskOutcome::Cancelled;
            self.inner
                .registry
                .lock()
                .await
                .record_outcome(TaskKind::Sync, &index.name, outcome);
            if cancelled {
                break;
            }
        }

        info!(index_name = %index.name, task_id, "sync task stopped");
        self.inner
            .registry
            .lock()
            .await
            .remove_if_current(TaskKind::Sync, &index.name, task_id);
    }
}

/// Turns the result of a run into the outcome recorded by the controller.
fn settle(kind: TaskKind, index_name: &str, result: EtlResult<TaskOutcome>) -> TaskOutcome {
    match result {
        Ok(outcome) => {
            info!(index_name, %kind, %outcome, "task finished");
            outcome
        }
        Err(err) => {
            error!(index_name, %kind, error = %err, "task failed");
            failed(&err)
        }
    }
}

fn failed(err: &EtlError) -> TaskOutcome {
    TaskOutcome::Failed {
        error: err.summary(),
    }
}

fn not_configured(index_name: &str) -> String {
    log_message(format!("Index {index_name} is not configured"))
}

fn log_message(message: String) -> String {
    info!("{message}");
    message
}
