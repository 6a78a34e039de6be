use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Type};
use uuid::Uuid;

use crate::bail;
use crate::conversions::numeric::PgNumeric;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, SourceRow};

/// Converts a row returned by `tokio-postgres` into a [`SourceRow`].
///
/// Columns of types without a [`Cell`] counterpart are rejected; queries can cast them
/// to `text` instead.
pub fn row_to_source_row(row: &Row) -> EtlResult<SourceRow> {
    let mut columns = Vec::with_capacity(row.len());
    for (position, column) in row.columns().iter().enumerate() {
        let value = cell_at(row, position, column.type_(), column.name())?;
        columns.push((column.name().to_string(), value));
    }

    Ok(SourceRow::new(columns))
}

fn cell_at(row: &Row, position: usize, ty: &Type, name: &str) -> EtlResult<Cell> {
    let cell = match *ty {
        Type::BOOL => get::<bool>(row, position, name)?.map(Cell::Bool),
        Type::CHAR => get::<i8>(row, position, name)?.map(|v| Cell::I16(i16::from(v))),
        Type::INT2 => get::<i16>(row, position, name)?.map(Cell::I16),
        Type::INT4 => get::<i32>(row, position, name)?.map(Cell::I32),
        Type::INT8 => get::<i64>(row, position, name)?.map(Cell::I64),
        Type::OID => get::<u32>(row, position, name)?.map(Cell::U32),
        Type::FLOAT4 => get::<f32>(row, position, name)?.map(Cell::F32),
        Type::FLOAT8 => get::<f64>(row, position, name)?.map(Cell::F64),
        Type::NUMERIC => get::<PgNumeric>(row, position, name)?.map(Cell::Numeric),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, position, name)?.map(Cell::String)
        }
        Type::DATE => get::<NaiveDate>(row, position, name)?.map(Cell::Date),
        Type::TIME => get::<NaiveTime>(row, position, name)?.map(Cell::Time),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, position, name)?.map(Cell::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, position, name)?.map(Cell::TimestampTz),
        Type::UUID => get::<Uuid>(row, position, name)?.map(Cell::Uuid),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, position, name)?.map(Cell::Json),
        Type::BYTEA => get::<Vec<u8>>(row, position, name)?.map(Cell::Bytes),
        ref other => bail!(
            ErrorKind::ConversionError,
            "Unsupported column type",
            format!("column `{name}` has type `{other}`, cast it to text in the query")
        ),
    };

    Ok(cell.unwrap_or(Cell::Null))
}

fn get<'a, T>(row: &'a Row, position: usize, name: &str) -> EtlResult<Option<T>>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(position).map_err(|err| {
        crate::etl_error!(
            ErrorKind::ConversionError,
            "Column value could not be decoded",
            format!("column `{name}`: {err}")
        )
    })
}
