use chrono::{DateTime, Utc};
use postgres::checkpoint::{delete_watermark, find_watermark, list_watermarks, upsert_watermark};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::EtlResult;
use crate::store::{CheckpointStore, ConnectionPoolMetrics};

/// [`CheckpointStore`] backed by the `espipe.espipe_timer` table.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Logs the stored watermarks and returns how many there are.
    pub async fn log_watermarks(&self) -> EtlResult<usize> {
        let rows = list_watermarks(&self.pool).await?;
        for row in &rows {
            info!(
                index_name = %row.index_name,
                last_refresh_time = %row.last_refresh_time,
                "found stored watermark"
            );
        }

        Ok(rows.len())
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    async fn save(&self, index_name: &str, last_refresh_time: DateTime<Utc>) -> EtlResult<()> {
        upsert_watermark(&self.pool, index_name, last_refresh_time).await?;
        debug!(index_name, %last_refresh_time, "saved watermark");

        Ok(())
    }

    async fn find(&self, index_name: &str) -> EtlResult<Option<DateTime<Utc>>> {
        Ok(find_watermark(&self.pool, index_name).await?)
    }

    async fn delete(&self, index_name: &str) -> EtlResult<()> {
        if delete_watermark(&self.pool, index_name).await? {
            debug!(index_name, "deleted watermark");
        }

        Ok(())
    }

    fn pool_metrics(&self) -> Option<ConnectionPoolMetrics> {
        Some(ConnectionPoolMetrics {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        })
    }
}
