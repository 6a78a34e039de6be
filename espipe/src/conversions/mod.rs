//! Decoding of Postgres values into [`crate::types::Cell`]s.

pub mod numeric;
pub mod row;
