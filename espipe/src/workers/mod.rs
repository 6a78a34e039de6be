//! Bounded execution of indexing work.

mod pool;

pub use pool::*;
