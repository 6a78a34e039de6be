//! Writes to the search engine.

mod base;
pub mod elasticsearch;

pub use base::*;
