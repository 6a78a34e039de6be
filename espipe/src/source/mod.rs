//! Streaming access to the relational source.

mod base;
pub mod postgres;
pub mod template;

pub use base::*;
