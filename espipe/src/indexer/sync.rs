use std::pin::pin;

use chrono::{TimeDelta, Utc};
use config::index::IndexConfig;
use config::shared::WatermarkPolicy;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::concurrency::cancel::CancelToken;
use crate::destination::BulkGateway;
use crate::document::assemble_document;
use crate::error::EtlResult;
use crate::indexer::{BatchDispatcher, Indexer, Progress, TaskOutcome};
use crate::source::template::to_native_placeholders;
use crate::source::{QueryParams, RowSource, SqlQuery};
use crate::store::CheckpointStore;

/// How far before the last watermark a sync window starts.
///
/// Rows whose timestamp equals the previous watermark are read again, which is harmless
/// since documents are upserted by id.
pub const SYNC_WINDOW_BACKOFF_SECS: i64 = 1;

impl<S, G, C> Indexer<S, G, C>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    /// Writes the rows changed since the last watermark of `index` as a single bulk
    /// request.
    pub async fn sync(&self, index: &IndexConfig, cancel: &CancelToken) -> EtlResult<TaskOutcome> {
        if !self.gateway.index_exists(&index.name).await? {
            warn!(index_name = %index.name, "index does not exist, run init first");
            return Ok(TaskOutcome::skipped("index does not exist, run init first"));
        }

        let Some(last_refresh_time) = self.store.find(&index.name).await? else {
            warn!(index_name = %index.name, "index has no watermark, run init first");
            return Ok(TaskOutcome::skipped("index has no watermark, run init first"));
        };

        let current_refresh_time = Utc::now();
        let policy = self.settings.watermark_policy;
        if policy == WatermarkPolicy::SaveBeforeSync {
            self.store.save(&index.name, current_refresh_time).await?;
        }

        let window_start = last_refresh_time - TimeDelta::seconds(SYNC_WINDOW_BACKOFF_SECS);
        debug!(
            index_name = %index.name,
            %window_start,
            window_end = %current_refresh_time,
            "syncing window"
        );

        let query = SqlQuery::new(
            to_native_placeholders(&index.sync_sql),
            QueryParams::Window {
                start: window_start,
                end: current_refresh_time,
            },
        );

        let Some(rows) = cancel.run(self.source.query(query)).await else {
            return Ok(TaskOutcome::Cancelled);
        };
        let mut rows = pin!(rows?);

        // The whole window goes out as one batch.
        let mut dispatcher = BatchDispatcher::new(
            index,
            &self.source,
            &self.gateway,
            usize::MAX,
            cancel.clone(),
        );

        loop {
            let Some(next) = cancel.run(rows.next()).await else {
                return Ok(TaskOutcome::Cancelled);
            };
            let Some(row) = next else {
                break;
            };

            let document = assemble_document(row?, index)?;
            if let Progress::Cancelled = dispatcher.push(document).await? {
                return Ok(TaskOutcome::Cancelled);
            }
        }

        let Some(summary) = dispatcher.finish().await? else {
            return Ok(TaskOutcome::Cancelled);
        };

        if policy == WatermarkPolicy::SaveAfterSync {
            self.store.save(&index.name, current_refresh_time).await?;
        }

        if summary.documents > 0 {
            info!(
                index_name = %index.name,
                documents = summary.documents,
                failed_items = summary.failed_items,
                "sync completed"
            );
        }

        Ok(summary.into())
    }
}
