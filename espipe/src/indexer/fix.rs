use std::collections::BTreeMap;
use std::pin::pin;

use chrono::Utc;
use config::index::IndexConfig;
use futures::StreamExt;
use pg_escape::quote_identifier;
use tracing::info;

use crate::bail;
use crate::concurrency::cancel::CancelToken;
use crate::destination::BulkGateway;
use crate::document::assemble_document;
use crate::error::{ErrorKind, EtlResult};
use crate::indexer::{BatchDispatcher, Indexer, Progress, TaskOutcome};
use crate::source::template::to_native_placeholders;
use crate::source::{QueryParam, QueryParams, RowSource, SqlQuery};
use crate::store::CheckpointStore;

/// Values of the id columns identifying the rows to re-index, keyed by column name.
pub type FixRequest = BTreeMap<String, String>;

/// Checks `request` against the id columns of `index` and returns the parsed values in
/// id column order.
fn parse_fix_request(index: &IndexConfig, request: &FixRequest) -> EtlResult<Vec<(String, i64)>> {
    if request.is_empty() {
        bail!(
            ErrorKind::InvalidArgument,
            "No id values given",
            format!("expected values for {:?}", index.id_columns)
        );
    }

    for key in request.keys() {
        if !index
            .id_columns
            .iter()
            .any(|column| column.eq_ignore_ascii_case(key))
        {
            bail!(
                ErrorKind::InvalidArgument,
                "Unknown id column",
                format!("{key} is not an id column of index {}", index.name)
            );
        }
    }

    let mut values = Vec::with_capacity(index.id_columns.len());
    for column in &index.id_columns {
        let Some(value) = request
            .iter()
            .find_map(|(key, value)| key.eq_ignore_ascii_case(column).then_some(value))
        else {
            bail!(
                ErrorKind::InvalidArgument,
                "Missing id column value",
                format!("no value given for id column {column}")
            );
        };

        let Ok(parsed) = value.trim().parse::<i64>() else {
            bail!(
                ErrorKind::InvalidArgument,
                "Invalid id column value",
                format!("value {value} is incorrect")
            );
        };
        values.push((column.clone(), parsed));
    }

    Ok(values)
}

/// Appends one equality predicate per id column to the init query.
fn fix_sql(init_sql: &str, ids: &[(String, i64)]) -> String {
    let mut sql = init_sql.trim_end().trim_end_matches(';').to_string();
    for (column, _) in ids {
        sql.push_str(" AND ");
        sql.push_str(&quote_identifier(column));
        sql.push_str(" = ?");
    }

    sql
}

impl<S, G, C> Indexer<S, G, C>
where
    S: RowSource,
    G: BulkGateway,
    C: CheckpointStore,
{
    /// Re-indexes the rows of the init query matching `request`, one bulk request per
    /// row.
    ///
    /// The watermark is never read or written. Fails with
    /// [`ErrorKind::InvalidArgument`] when the request is malformed or matches no row.
    pub async fn fix(
        &self,
        index: &IndexConfig,
        request: &FixRequest,
        cancel: &CancelToken,
    ) -> EtlResult<TaskOutcome> {
        let ids = parse_fix_request(index, request)?;

        let mut tail = Vec::with_capacity(ids.len());
        tail.extend(ids.iter().map(|(_, value)| QueryParam::Int(*value)));
        let query = SqlQuery::new(
            to_native_placeholders(&fix_sql(&index.init_sql, &ids)),
            QueryParams::Filled {
                fill: QueryParam::Timestamp(Utc::now()),
                tail,
            },
        );

        let Some(rows) = cancel.run(self.source.query(query)).await else {
            return Ok(TaskOutcome::Cancelled);
        };
        let mut rows = pin!(rows?);

        let mut dispatcher =
            BatchDispatcher::new(index, &self.source, &self.gateway, 1, cancel.clone());

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

        if summary.documents == 0 {
            bail!(
                ErrorKind::InvalidArgument,
                "No row matches the requested ids",
                format!("id {request:?} is not exist")
            );
        }

        info!(
            index_name = %index.name,
            documents = summary.documents,
            failed_items = summary.failed_items,
            "fix completed"
        );

        Ok(summary.into())
    }
}
