//! Persistence of index watermarks.

mod base;
pub mod memory;
pub mod postgres;

pub use base::*;
