//! Mirrors rows of a relational database into search engine indices.
//!
//! Every configured index is fed in three ways:
//!
//! - **init** recreates the index and bulk loads every row of its init query.
//! - **sync** periodically writes the rows changed since the last watermark.
//! - **fix** re-indexes specific rows identified by their id column values.
//!
//! The [`controller::TaskController`] admits, runs and cancels these tasks on bounded
//! [`workers::WorkerPool`]s, and [`scheduler`] keeps sync tasks registered.

pub mod concurrency;
pub mod controller;
pub mod conversions;
pub mod destination;
pub mod document;
pub mod error;
pub mod indexer;
mod macros;
pub mod scheduler;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
