use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::EtlResult;

/// Stores, per index, the time of the last successful refresh.
///
/// The watermark is the crash recovery anchor of sync: the next cycle reads rows changed
/// since that time. A missing watermark means the index was never initialized.
///
/// Only the task owning an index writes its watermark, so implementations need no
/// cross-index locking.
pub trait CheckpointStore: Clone + Send + Sync + 'static {
    /// Inserts or overwrites the watermark of `index_name`.
    fn save(
        &self,
        index_name: &str,
        last_refresh_time: DateTime<Utc>,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    fn find(&self, index_name: &str)
    -> impl Future<Output = EtlResult<Option<DateTime<Utc>>>> + Send;

    /// Removes the watermark of `index_name`. Does nothing when there is none.
    fn delete(&self, index_name: &str) -> impl Future<Output = EtlResult<()>> + Send;

    /// Connection pool state, for stores backed by one.
    fn pool_metrics(&self) -> Option<ConnectionPoolMetrics> {
        None
    }
}

/// Point in time view of a database connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionPoolMetrics {
    pub size: u32,
    pub idle: usize,
}
