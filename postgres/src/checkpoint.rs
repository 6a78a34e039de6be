use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, prelude::FromRow};

/// A row of the `espipe.espipe_timer` table.
#[derive(Debug, Clone, FromRow)]
pub struct WatermarkRow {
    pub index_name: String,
    pub last_refresh_time: DateTime<Utc>,
}

/// Returns the watermark stored for `index_name`, if any.
pub async fn find_watermark<'c, E>(
    executor: E,
    index_name: &str,
) -> sqlx::Result<Option<DateTime<Utc>>>
where
    E: PgExecutor<'c>,
{
    let row = sqlx::query_as::<_, WatermarkRow>(
        r#"
        select index_name, last_refresh_time
        from espipe.espipe_timer
        where index_name = $1
        "#,
    )
    .bind(index_name)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|row| row.last_refresh_time))
}

/// Inserts or overwrites the watermark of `index_name`.
pub async fn upsert_watermark<'c, E>(
    executor: E,
    index_name: &str,
    last_refresh_time: DateTime<Utc>,
) -> sqlx::Result<()>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        insert into espipe.espipe_timer (index_name, last_refresh_time)
        values ($1, $2)
        on conflict (index_name)
        do update set last_refresh_time = excluded.last_refresh_time
        "#,
    )
    .bind(index_name)
    .bind(last_refresh_time)
    .execute(executor)
    .await?;

    Ok(())
}

/// Removes the watermark of `index_name`. Returns whether a row was deleted.
pub async fn delete_watermark<'c, E>(executor: E, index_name: &str) -> sqlx::Result<bool>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
        delete from espipe.espipe_timer
        where index_name = $1
        "#,
    )
    .bind(index_name)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns every stored watermark ordered by index name.
pub async fn list_watermarks<'c, E>(executor: E) -> sqlx::Result<Vec<WatermarkRow>>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, WatermarkRow>(
        r#"
        select index_name, last_refresh_time
        from espipe.espipe_timer
        order by index_name
        "#,
    )
    .fetch_all(executor)
    .await
}
