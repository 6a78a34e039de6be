use std::pin::pin;

use chrono::Utc;
use config::index::IndexConfig;
use futures::StreamExt;
use tracing::{info, warn};

use crate::concurrency::cancel::CancelToken;
use crate::destination::BulkGateway;
use crate::document::assemble_document;
use crate::error::EtlResult;
use crate::indexer::{BatchDispatcher, Indexer, Progress, TaskOutcome};
use crate::source::template::to_native_placeholders;
use crate::source::{QueryParam, QueryParams, RowSource, SqlQuery};
use crate::store::CheckpointStore;

impl<S, G, C> Indexer<S, G, C>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    /// Rebuilds `index` from scratch with the rows returned by its init query.
    ///
    /// The index is recreated, every row is streamed into bulk requests of the configured
    /// batch size and the watermark is set to the time the query was issued. A cancelled
    /// run leaves the watermark deleted, so sync refuses the half built index until the
    /// next successful init.
    pub async fn init(&self, index: &IndexConfig, cancel: &CancelToken) -> EtlResult<TaskOutcome> {
        if !self.gateway.is_healthy().await {
            warn!(index_name = %index.name, "search engine is unavailable, skipping init");
            return Ok(TaskOutcome::skipped("search engine is unavailable"));
        }

        info!(index_name = %index.name, "starting init");

        self.store.delete(&index.name).await?;
        self.gateway.create_index(index).await?;
        self.gateway.relax_refresh_for_bulk_load(&index.name).await?;

        let current_refresh_time = Utc::now();
        let query = SqlQuery::new(
            to_native_placeholders(&index.init_sql),
            QueryParams::Filled {
                fill: QueryParam::Timestamp(current_refresh_time),
                tail: Vec::new(),
            },
        );

        let Some(rows) = cancel.run(self.source.query(query)).await else {
            return Ok(cancelled(index));
        };
        let mut rows = pin!(rows?);

        let mut dispatcher = BatchDispatcher::new(
            index,
            &self.source,
            &self.gateway,
            self.settings.batch_size,
            cancel.clone(),
        );

        loop {
            let Some(next) = cancel.run(rows.next()).await else {
                return Ok(cancelled(index));
            };
            let Some(row) = next else {
                break;
            };

            let document = assemble_document(row?, index)?;
            if let Progress::Cancelled = dispatcher.push(document).await? {
                return Ok(cancelled(index));
            }
        }

        let Some(summary) = dispatcher.finish().await? else {
            return Ok(cancelled(index));
        };

        self.gateway.restore_refresh_interval(&index.name).await?;
        self.store.save(&index.name, current_refresh_time).await?;

        info!(
            index_name = %index.name,
            documents = summary.documents,
            batches = summary.batches,
            failed_items = summary.failed_items,
            last_refresh_time = %current_refresh_time,
            "init completed"
        );

        Ok(summary.into())
    }
}

fn cancelled(index: &IndexConfig) -> TaskOutcome {
    info!(index_name = %index.name, "init cancelled");
    TaskOutcome::Cancelled
}
