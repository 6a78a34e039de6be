use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use chrono::{DateTime, Local, Utc};
use futures::Stream;
use serde::Serialize;
use tokio_postgres::types::{IsNull, ToSql, Type};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, SourceRow};

/// Source of rows for index queries.
///
/// Implementations run one query per call and stream its rows. A query is never
/// buffered in full, so init can walk tables larger than memory.
pub trait RowSource: Clone + Send + Sync + 'static {
    type Stream: Stream<Item = EtlResult<SourceRow>> + Send + 'static;

    fn query(&self, query: SqlQuery) -> impl Future<Output = EtlResult<Self::Stream>> + Send;

    /// Connections opened for query streams so far, and how many are still open.
    fn stream_metrics(&self) -> StreamMetrics;
}

/// Point in time view of the connections held by query streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamMetrics {
    pub active_connections: usize,
    pub opened_connections: usize,
}

#[derive(Debug, Default)]
struct StreamCounts {
    active: AtomicUsize,
    opened: AtomicUsize,
}

/// Counts the streams of a [`RowSource`]. Clones share their counts.
#[derive(Debug, Clone, Default)]
pub struct StreamCounter {
    counts: Arc<StreamCounts>,
}

impl StreamCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an opened stream. It counts as active until the guard is dropped.
    pub fn open(&self) -> StreamGuard {
        self.counts.opened.fetch_add(1, Ordering::Relaxed);
        self.counts.active.fetch_add(1, Ordering::Relaxed);

        StreamGuard {
            counts: self.counts.clone(),
        }
    }

    pub fn metrics(&self) -> StreamMetrics {
        StreamMetrics {
            active_connections: self.counts.active.load(Ordering::Relaxed),
            opened_connections: self.counts.opened.load(Ordering::Relaxed),
        }
    }
}

/// Keeps one stream of a [`StreamCounter`] active.
#[derive(Debug)]
pub struct StreamGuard {
    counts: Arc<StreamCounts>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.counts.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A query with `$n` placeholders and the values to bind to them.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: QueryParams,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>, params: QueryParams) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// How values are bound to the parameters declared by a statement.
///
/// The number of declared parameters is only known once the statement is prepared, so
/// every variant resolves against that count.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParams {
    /// Exactly these values, in order.
    Positional(Vec<QueryParam>),
    /// `tail` binds the last parameters and every parameter before them gets `fill`.
    Filled {
        fill: QueryParam,
        tail: Vec<QueryParam>,
    },
    /// Parameters alternate between `start` (even positions) and `end` (odd positions).
    Window {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl QueryParams {
    /// Expands the parameters for a statement declaring `count` parameters.
    pub fn resolve(&self, count: usize) -> EtlResult<Vec<QueryParam>> {
        match self {
            QueryParams::Positional(values) => {
                if values.len() != count {
                    bail!(
                        ErrorKind::ConfigError,
                        "Query parameter count mismatch",
                        format!("statement declares {count} parameters, {} given", values.len())
                    );
                }

                Ok(values.clone())
            }
            QueryParams::Filled { fill, tail } => {
                if tail.len() > count {
                    bail!(
                        ErrorKind::ConfigError,
                        "Query parameter count mismatch",
                        format!(
                            "statement declares {count} parameters, at least {} needed",
                            tail.len()
                        )
                    );
                }

                let mut values = vec![fill.clone(); count - tail.len()];
                values.extend(tail.iter().cloned());

                Ok(values)
            }
            QueryParams::Window { start, end } => Ok((0..count)
                .map(|position| {
                    if position % 2 == 0 {
                        QueryParam::Timestamp(*start)
                    } else {
                        QueryParam::Timestamp(*end)
                    }
                })
                .collect()),
        }
    }
}

/// A value bound to a query parameter.
///
/// Values are converted to the parameter type Postgres infers for the statement, so a
/// text value can be bound to an integer column and a timestamp can be bound to either
/// `timestamp` or `timestamptz`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl From<&Cell> for QueryParam {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Null => QueryParam::Null,
            Cell::Bool(value) => QueryParam::Bool(*value),
            Cell::I16(value) => QueryParam::Int(i64::from(*value)),
            Cell::I32(value) => QueryParam::Int(i64::from(*value)),
            Cell::I64(value) => QueryParam::Int(*value),
            Cell::U32(value) => QueryParam::Int(i64::from(*value)),
            Cell::F32(value) => QueryParam::Float(f64::from(*value)),
            Cell::F64(value) => QueryParam::Float(*value),
            Cell::TimestampTz(value) => QueryParam::Timestamp(*value),
            other => QueryParam::Text(other.to_string()),
        }
    }
}

type BoxError = Box<dyn Error + Sync + Send>;

impl QueryParam {
    fn as_i64(&self, ty: &Type) -> Result<i64, BoxError> {
        match self {
            QueryParam::Int(value) => Ok(*value),
            QueryParam::Bool(value) => Ok(i64::from(*value)),
            QueryParam::Text(value) => Ok(value.trim().parse()?),
            other => Err(format!("cannot bind {other:?} to a parameter of type {ty}").into()),
        }
    }

    fn as_f64(&self, ty: &Type) -> Result<f64, BoxError> {
        match self {
            QueryParam::Int(value) => Ok(*value as f64),
            QueryParam::Float(value) => Ok(*value),
            QueryParam::Text(value) => Ok(value.trim().parse()?),
            other => Err(format!("cannot bind {other:?} to a parameter of type {ty}").into()),
        }
    }

    fn as_text(&self) -> String {
        match self {
            QueryParam::Null => String::new(),
            QueryParam::Bool(value) => value.to_string(),
            QueryParam::Int(value) => value.to_string(),
            QueryParam::Float(value) => value.to_string(),
            QueryParam::Text(value) => value.clone(),
            QueryParam::Timestamp(value) => value.to_rfc3339(),
        }
    }
}

impl ToSql for QueryParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if let QueryParam::Null = self {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => match self {
                QueryParam::Bool(value) => value.to_sql(ty, out),
                QueryParam::Text(value) => value.trim().parse::<bool>()?.to_sql(ty, out),
                other => Err(format!("cannot bind {other:?} to a parameter of type {ty}").into()),
            },
            Type::INT2 => i16::try_from(self.as_i64(ty)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.as_i64(ty)?)?.to_sql(ty, out),
            Type::INT8 => self.as_i64(ty)?.to_sql(ty, out),
            Type::FLOAT4 => (self.as_f64(ty)? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.as_f64(ty)?.to_sql(ty, out),
            Type::UUID => Uuid::parse_str(self.as_text().trim())?.to_sql(ty, out),
            Type::TIMESTAMPTZ => match self {
                QueryParam::Timestamp(value) => value.to_sql(ty, out),
                QueryParam::Text(value) => DateTime::parse_from_rfc3339(value)?
                    .with_timezone(&Utc)
                    .to_sql(ty, out),
                other => Err(format!("cannot bind {other:?} to a parameter of type {ty}").into()),
            },
            // Columns without a time zone hold local wall clock time.
            Type::TIMESTAMP => match self {
                QueryParam::Timestamp(value) => {
                    value.with_timezone(&Local).naive_local().to_sql(ty, out)
                }
                other => Err(format!("cannot bind {other:?} to a parameter of type {ty}").into()),
            },
            Type::DATE => match self {
                QueryParam::Timestamp(value) => {
                    value.with_timezone(&Local).date_naive().to_sql(ty, out)
                }
                other => Err(format!("cannot bind {other:?} to a parameter of type {ty}").into()),
            },
            _ => self.as_text().to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::BOOL
                | Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::UUID
                | Type::TIMESTAMPTZ
                | Type::TIMESTAMP
                | Type::DATE
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::UNKNOWN
        )
    }

    tokio_postgres::types::to_sql_checked!();
}
