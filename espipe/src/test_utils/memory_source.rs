use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::sync::{RwLock, watch};

use crate::error::EtlResult;
use crate::source::{RowSource, SqlQuery, StreamCounter, StreamGuard, StreamMetrics};
use crate::types::SourceRow;

struct ScriptedQuery {
    fragment: String,
    rows: Vec<SourceRow>,
    gate: Option<watch::Receiver<bool>>,
}

#[derive(Default)]
struct Inner {
    scripts: Vec<ScriptedQuery>,
    executed: Vec<SqlQuery>,
}

/// Holds the streams of a scripted query open until [`SourceGate::open`] is called.
#[derive(Debug, Clone)]
pub struct SourceGate {
    tx: Arc<watch::Sender<bool>>,
}

impl SourceGate {
    pub fn open(&self) {
        self.tx.send_replace(true);
    }
}

/// Row source answering queries with scripted rows.
///
/// A query gets the rows of the script with the longest SQL fragment it contains, or no
/// rows when no script matches.
#[derive(Clone, Default)]
pub struct MemoryRowSource {
    inner: Arc<RwLock<Inner>>,
    streams: StreamCounter,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers queries containing `fragment` with `rows`.
    pub async fn add_rows(&self, fragment: &str, rows: Vec<SourceRow>) {
        self.inner.write().await.scripts.push(ScriptedQuery {
            fragment: fragment.to_string(),
            rows,
            gate: None,
        });
    }

    /// Like [`MemoryRowSource::add_rows`], but streams wait for the returned gate before
    /// yielding their first row.
    pub async fn add_gated_rows(&self, fragment: &str, rows: Vec<SourceRow>) -> SourceGate {
        let (tx, rx) = watch::channel(false);
        self.inner.write().await.scripts.push(ScriptedQuery {
            fragment: fragment.to_string(),
            rows,
            gate: Some(rx),
        });

        SourceGate { tx: Arc::new(tx) }
    }

    /// Every query executed so far, in order.
    pub async fn executed_queries(&self) -> Vec<SqlQuery> {
        self.inner.read().await.executed.clone()
    }

    pub async fn executed_queries_containing(&self, fragment: &str) -> Vec<SqlQuery> {
        self.inner
            .read()
            .await
            .executed
            .iter()
            .filter(|query| query.sql.contains(fragment))
            .cloned()
            .collect()
    }
}

impl RowSource for MemoryRowSource {
    type Stream = BoxStream<'static, EtlResult<SourceRow>>;

    async fn query(&self, query: SqlQuery) -> EtlResult<Self::Stream> {
        let mut inner = self.inner.write().await;

        let script = inner
            .scripts
            .iter()
            .filter(|script| query.sql.contains(&script.fragment))
            .max_by_key(|script| script.fragment.len());
        let mut rows = script.map(|script| script.rows.clone()).unwrap_or_default();
        let gate = script.and_then(|script| script.gate.clone());

        inner.executed.push(query);

        let stream = stream::once(async move {
            if let Some(mut gate) = gate {
                let _ = gate.wait_for(|open| *open).await;
            }
        })
        .flat_map(move |()| stream::iter(mem::take(&mut rows).into_iter().map(Ok)));

        Ok(CountedStream {
            rows: stream.boxed(),
            _guard: self.streams.open(),
        }
        .boxed())
    }

    fn stream_metrics(&self) -> StreamMetrics {
        self.streams.metrics()
    }
}

/// Scripted rows counted as one open stream until dropped.
struct CountedStream {
    rows: BoxStream<'static, EtlResult<SourceRow>>,
    _guard: StreamGuard,
}

impl Stream for CountedStream {
    type Item = EtlResult<SourceRow>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rows.poll_next_unpin(cx)
    }
}
