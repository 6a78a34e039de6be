//! Coordination primitives shared by tasks and workers.

pub mod cancel;
