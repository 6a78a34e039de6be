use std::time::Duration;

use config::shared::SchedulerConfig;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::concurrency::cancel::CancelToken;
use crate::controller::TaskController;
use crate::destination::BulkGateway;
use crate::source::RowSource;
use crate::store::CheckpointStore;

/// Periodically admits sync tasks for every configured index.
///
/// Indices whose init finished since the previous tick get their sync task back, since
/// starting an init removes the sync task of the index. Indices already syncing or
/// initializing are left alone by the controller.
///
/// Returns `None` when the scheduler is disabled.
pub fn start_sync_scheduler<S, G, C>(
    controller: TaskController<S, G, C>,
    config: &SchedulerConfig,
    shutdown: CancelToken,
) -> Option<JoinHandle<()>>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    if !config.enabled {
        info!("sync scheduler is disabled");
        return None;
    }

    let period = Duration::from_millis(config.interval_ms.max(1));

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_ms = period.as_millis() as u64, "sync scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let messages = controller.start_sync_all().await;
                    debug!(?messages, "scheduled sync admission");
                }
            }
        }

        info!("sync scheduler stopped");
    }))
}
