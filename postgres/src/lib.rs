//! Postgres plumbing for espipe: pool creation, schema migrations and the queries
//! backing the watermark table.

pub mod checkpoint;
pub mod migrations;

use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};

/// Connects a small pool to the source database.
pub async fn connect_to_source_database(
    config: &PgConnectionConfig,
    min_connections: u32,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    let options: PgConnectOptions = config.with_db();

    let pool = PgPoolOptions::new()
        .min_connections(min_connections)
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}
