//! Logging setup shared by the espipe binaries and tests.

pub mod tracing;
