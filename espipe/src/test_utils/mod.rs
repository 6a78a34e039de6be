//! In-memory collaborators for exercising the engine without Postgres or a search engine.
//!
//! - [`memory_source`] scripts the rows returned per query and records executed queries.
//! - [`memory_gateway`] records bulk submissions in call order.
//! - [`index`] builds index configurations and rows.
//!
//! Watermarks are kept by [`crate::store::memory::MemoryCheckpointStore`].

pub mod index;
pub mod memory_gateway;
pub mod memory_source;
