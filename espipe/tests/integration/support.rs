use std::future::Future;
use std::time::Duration;

use config::index::{IndexConfig, IndexConfigs};
use config::shared::{SyncConfig, WatermarkPolicy};
use espipe::controller::TaskController;
use espipe::indexer::{Indexer, IndexerSettings};
use espipe::store::memory::MemoryCheckpointStore;
use espipe::test_utils::memory_gateway::MemoryGateway;
use espipe::test_utils::memory_source::MemoryRowSource;
use espipe::workers::WorkerPool;

pub type TestIndexer = Indexer<MemoryRowSource, MemoryGateway, MemoryCheckpointStore>;

pub type TestController = TaskController<MemoryRowSource, MemoryGateway, MemoryCheckpointStore>;

/// In-memory collaborators shared by an indexer and the test asserting on them.
#[derive(Clone, Default)]
pub struct Harness {
    pub source: MemoryRowSource,
    pub gateway: MemoryGateway,
    pub store: MemoryCheckpointStore,
}

impl Harness {
    pub fn indexer(&self, batch_size: usize, watermark_policy: WatermarkPolicy) -> TestIndexer {
        Indexer::new(
            self.source.clone(),
            self.gateway.clone(),
            self.store.clone(),
            IndexerSettings {
                batch_size,
                watermark_policy,
            },
        )
    }

    /// A controller whose sync tasks wait a minute before their first run.
    pub fn controller(&self, indices: Vec<IndexConfig>) -> TestController {
        TaskController::new(
            self.indexer(100, WatermarkPolicy::SaveBeforeSync),
            IndexConfigs::new(indices),
            SyncConfig {
                initial_delay_ms: 60_000,
                period_ms: 60_000,
                watermark_policy: WatermarkPolicy::SaveBeforeSync,
            },
            WorkerPool::new("init", 2),
            WorkerPool::new("sync", 1),
        )
    }
}

/// Polls `condition` until it holds, failing the test after ten seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let reached = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(reached.is_ok(), "condition was not reached in time");
}
