//! Values flowing through the engine: typed cells, source rows and documents.

mod cell;
mod document;
mod row;

pub use cell::*;
pub use document::*;
pub use row::*;

pub use crate::conversions::numeric::PgNumeric;
