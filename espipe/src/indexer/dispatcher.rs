use std::mem;

use config::index::IndexConfig;
use futures::TryStreamExt;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::concurrency::cancel::CancelToken;
use crate::destination::{BulkGateway, BulkOutcome};
use crate::document::{ExtensionRow, collect_join_values, merge_extension_rows};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::source::template::expand_list_placeholder;
use crate::source::{QueryParam, QueryParams, RowSource, SqlQuery};
use crate::types::{Cell, Document};

/// Most join values bound by one extension query. The wire protocol encodes the parameter
/// count of a statement as a signed 16 bit integer.
pub const MAX_EXTENSION_PARAMETERS: usize = i16::MAX as usize;

/// Whether the caller should keep going after a dispatcher step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Progress {
    Continue,
    Cancelled,
}

/// Totals of a finished dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub documents: usize,
    pub batches: usize,
    pub failed_items: usize,
}

/// Accumulates documents and turns each full batch into one bulk request.
///
/// Bulk requests are spawned as soon as a batch is flushed and awaited together in
/// [`BatchDispatcher::finish`]. Dropping the dispatcher aborts the requests still in
/// flight.
pub struct BatchDispatcher<'a, S, G> {
    index: &'a IndexConfig,
    source: &'a S,
    gateway: &'a G,
    cancel: CancelToken,
    batch_size: usize,
    batch: Vec<Document>,
    in_flight: JoinSet<EtlResult<BulkOutcome>>,
    documents: usize,
    batches: usize,
}

impl<'a, S, G> BatchDispatcher<'a, S, G>
where
    S: RowSource,
    G: BulkGateway,
{
    pub fn new(
        index: &'a IndexConfig,
        source: &'a S,
        gateway: &'a G,
        batch_size: usize,
        cancel: CancelToken,
    ) -> Self {
        let batch_size = batch_size.max(1);

        Self {
            index,
            source,
            gateway,
            cancel,
            batch_size,
            batch: Vec::new(),
            in_flight: JoinSet::new(),
            documents: 0,
            batches: 0,
        }
    }

    /// Appends `document`, flushing once the batch is full.
    pub async fn push(&mut self, document: Document) -> EtlResult<Progress> {
        if self.cancel.is_cancelled() {
            return Ok(Progress::Cancelled);
        }

        self.batch.push(document);
        if self.batch.len() >= self.batch_size {
            return self.flush().await;
        }

        Ok(Progress::Continue)
    }

    /// Merges extension fields into the current batch and spawns it as one bulk request.
    pub async fn flush(&mut self) -> EtlResult<Progress> {
        if self.cancel.is_cancelled() {
            return Ok(Progress::Cancelled);
        }
        if self.batch.is_empty() {
            return Ok(Progress::Continue);
        }

        let mut documents = mem::take(&mut self.batch);

        if let Some((sql, column)) = self.index.extension() {
            let join_values = collect_join_values(&documents, column);
            if !join_values.is_empty() {
                let Some(rows) = self
                    .cancel
                    .run(fetch_extension_rows(self.source, sql, &join_values))
                    .await
                else {
                    return Ok(Progress::Cancelled);
                };
                merge_extension_rows(&mut documents, column, self.index.fields_mode, rows?);
            }
        }

        let size = documents.len();
        let bulk = self.gateway.bulk_upsert(&self.index.name, documents)?;
        self.in_flight.spawn(bulk);

        self.documents += size;
        self.batches += 1;
        debug!(
            index_name = %self.index.name,
            batch_size = size,
            batches = self.batches,
            "submitted bulk request"
        );

        Ok(Progress::Continue)
    }

    /// Flushes the partial batch, then awaits every bulk request spawned so far.
    ///
    /// Item level failures are logged and counted. Failed requests are aggregated into the
    /// returned error once all requests have completed. Returns `None` when cancelled.
    pub async fn finish(mut self) -> EtlResult<Option<DispatchSummary>> {
        if let Progress::Cancelled = self.flush().await? {
            return Ok(None);
        }

        let mut failed_items = 0;
        let mut errors: Vec<EtlError> = Vec::new();

        loop {
            let Some(next) = self.cancel.run(self.in_flight.join_next()).await else {
                self.in_flight.abort_all();
                return Ok(None);
            };

            match next {
                None => break,
                Some(Ok(Ok(outcome))) => {
                    failed_items += log_bulk_outcome(&self.index.name, &outcome);
                }
                Some(Ok(Err(err))) => {
                    error!(index_name = %self.index.name, error = %err, "bulk request failed");
                    errors.push(err);
                }
                Some(Err(join_err)) => {
                    errors.push(etl_error!(
                        ErrorKind::WorkerPanic,
                        "Bulk request task failed",
                        join_err
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(Some(DispatchSummary {
            documents: self.documents,
            batches: self.batches,
            failed_items,
        }))
    }
}

/// Runs the extension query for `join_values`, one query per
/// [`MAX_EXTENSION_PARAMETERS`] values, and returns the rows of every query.
async fn fetch_extension_rows<S>(
    source: &S,
    sql: &str,
    join_values: &[Cell],
) -> EtlResult<Vec<ExtensionRow>>
where
    S: RowSource,
{
    let mut extension_rows = Vec::new();
    for chunk in join_values.chunks(MAX_EXTENSION_PARAMETERS) {
        let chunk_sql = expand_list_placeholder(sql, chunk.len())?;
        let params = chunk.iter().map(QueryParam::from).collect();
        let rows = source
            .query(SqlQuery::new(chunk_sql, QueryParams::Positional(params)))
            .await?;

        let mut rows: Vec<ExtensionRow> = rows
            .and_then(|row| async move { ExtensionRow::from_source_row(row) })
            .try_collect()
            .await?;
        extension_rows.append(&mut rows);
    }

    Ok(extension_rows)
}

/// Logs the rejected items of `outcome` and returns how many there were.
///
/// Version conflicts come from overlapping sync windows resubmitting a document, so they
/// are only warnings.
fn log_bulk_outcome(index_name: &str, outcome: &BulkOutcome) -> usize {
    if !outcome.errors {
        return 0;
    }

    for item in &outcome.failed_items {
        if item.is_version_conflict() {
            warn!(
                index_name,
                id = %item.id,
                error_type = %item.error_type,
                reason = %item.reason,
                "document was not written"
            );
        } else {
            error!(
                index_name,
                id = %item.id,
                error_type = %item.error_type,
                reason = %item.reason,
                "document was not written"
            );
        }
    }

    outcome.failed_items.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::BulkItemError;

    #[test]
    fn only_failed_items_are_counted() {
        assert_eq!(log_bulk_outcome("orders", &BulkOutcome::succeeded(3)), 0);

        let outcome = BulkOutcome {
            errors: true,
            submitted: 3,
            failed_items: vec![
                BulkItemError {
                    id: "1".to_string(),
                    error_type: "version_conflict_engine_exception".to_string(),
                    reason: "version conflict".to_string(),
                },
                BulkItemError {
                    id: "2".to_string(),
                    error_type: "mapper_parsing_exception".to_string(),
                    reason: "failed to parse".to_string(),
                },
            ],
        };
        assert_eq!(log_bulk_outcome("orders", &outcome), 2);
    }
}
