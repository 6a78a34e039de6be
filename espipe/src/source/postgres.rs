use std::io::BufReader;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use config::shared::{IntoConnectOptions, PgConnectionConfig};
use futures::Stream;
use pin_project_lite::pin_project;
use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, Connection, NoTls, RowStream, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error};

use crate::conversions::row::row_to_source_row;
use crate::error::EtlResult;
use crate::source::{RowSource, SqlQuery, StreamCounter, StreamGuard, StreamMetrics};
use crate::types::SourceRow;

/// Watches a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(err) = connection.await {
            error!("an error occurred during the postgres connection: {}", err);
        }
    }
    .instrument(span);

    // The connection ends when its `Client` is dropped, so the handle is not kept.
    tokio::spawn(task);
}

/// [`RowSource`] backed by Postgres.
///
/// Every query opens its own connection, which lives as long as the returned stream.
/// Concurrent init tasks therefore never share a connection.
#[derive(Debug, Clone)]
pub struct PostgresRowSource {
    config: PgConnectionConfig,
    streams: StreamCounter,
}

impl PostgresRowSource {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self {
            config,
            streams: StreamCounter::new(),
        }
    }

    async fn connect(&self) -> EtlResult<Client> {
        match self.config.tls.enabled {
            true => self.connect_tls().await,
            false => self.connect_no_tls().await,
        }
    }

    async fn connect_no_tls(&self) -> EtlResult<Client> {
        let config: Config = self.config.with_db();
        let (client, connection) = config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);

        debug!("connected to postgres without tls");

        Ok(client)
    }

    async fn connect_tls(&self) -> EtlResult<Client> {
        let config: Config = self.config.with_db();

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader = BufReader::new(self.config.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            let cert = cert?;
            root_store.add(cert)?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
        spawn_postgres_connection::<MakeRustlsConnect>(connection);

        debug!("connected to postgres with tls");

        Ok(client)
    }
}

impl RowSource for PostgresRowSource {
    type Stream = PgRowStream;

    async fn query(&self, query: SqlQuery) -> EtlResult<Self::Stream> {
        let client = self.connect().await?;
        let guard = self.streams.open();

        let statement = client.prepare(&query.sql).await?;
        let params = query.params.resolve(statement.params().len())?;
        debug!(sql = %query.sql, params = params.len(), "streaming source query");

        let rows = client
            .query_raw(&statement, params.iter().map(|param| param as &dyn ToSql))
            .await?;

        Ok(PgRowStream {
            _client: client,
            _guard: guard,
            rows,
        })
    }

    fn stream_metrics(&self) -> StreamMetrics {
        self.streams.metrics()
    }
}

pin_project! {
    /// Rows of one source query. Owns the client so the connection stays open while
    /// rows are consumed.
    pub struct PgRowStream {
        _client: Client,
        _guard: StreamGuard,
        #[pin]
        rows: RowStream,
    }
}

impl Stream for PgRowStream {
    type Item = EtlResult<SourceRow>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.rows.poll_next(cx)) {
            Some(Ok(row)) => Poll::Ready(Some(row_to_source_row(&row))),
            Some(Err(err)) => Poll::Ready(Some(Err(err.into()))),
            None => Poll::Ready(None),
        }
    }
}
