use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::conversions::numeric::PgNumeric;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A single typed value read from the relational source.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I16(i16),
    I32(i32),
    I64(i64),
    U32(u32),
    F32(f32),
    F64(f64),
    Numeric(PgNumeric),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// Natural text form, used for document ids, extension join values and concatenated
/// extension fields.
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("null"),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::String(value) => f.write_str(value),
            Cell::I16(value) => write!(f, "{value}"),
            Cell::I32(value) => write!(f, "{value}"),
            Cell::I64(value) => write!(f, "{value}"),
            Cell::U32(value) => write!(f, "{value}"),
            Cell::F32(value) => write!(f, "{value}"),
            Cell::F64(value) => write!(f, "{value}"),
            Cell::Numeric(value) => write!(f, "{value}"),
            Cell::Date(value) => write!(f, "{}", value.format(DATE_FORMAT)),
            Cell::Time(value) => write!(f, "{}", value.format(TIME_FORMAT)),
            Cell::Timestamp(value) => write!(f, "{}", value.format(TIMESTAMP_FORMAT)),
            Cell::TimestampTz(value) => {
                f.write_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Cell::Uuid(value) => write!(f, "{value}"),
            Cell::Json(value) => write!(f, "{value}"),
            Cell::Bytes(value) => f.write_str(&BASE64.encode(value)),
        }
    }
}

/// Numbers stay numbers, json stays structured and everything else is written as its
/// text form. Numerics are written as strings to keep their full precision.
impl Serialize for Cell {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Bool(value) => serializer.serialize_bool(*value),
            Cell::String(value) => serializer.serialize_str(value),
            Cell::I16(value) => serializer.serialize_i16(*value),
            Cell::I32(value) => serializer.serialize_i32(*value),
            Cell::I64(value) => serializer.serialize_i64(*value),
            Cell::U32(value) => serializer.serialize_u32(*value),
            Cell::F32(value) => serializer.serialize_f32(*value),
            Cell::F64(value) => serializer.serialize_f64(*value),
            Cell::Json(value) => value.serialize(serializer),
            other => serializer.collect_str(other),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::I32(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::TimestampTz(value)
    }
}

impl<T> From<Option<T>> for Cell
where
    T: Into<Cell>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}
