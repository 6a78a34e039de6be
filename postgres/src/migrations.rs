use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{
    Executor,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::info;

/// Applies the migrations creating the `espipe` schema objects.
///
/// The `_sqlx_migrations` metadata table is kept inside the `espipe` schema so the
/// source database's public schema is left untouched.
pub async fn apply_espipe_migrations(
    connection_config: &PgConnectionConfig,
) -> Result<(), sqlx::Error> {
    let options: PgConnectOptions = connection_config.with_db();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists espipe;").await?;
                conn.execute("set search_path = 'espipe';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying espipe migrations");

    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await?;

    info!("espipe migrations successfully applied");

    pool.close().await;

    Ok(())
}
