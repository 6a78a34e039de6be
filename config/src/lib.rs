//! Configuration types and loaders shared by the espipe crates.
//!
//! [`shared`] holds the serde types deserialized from the layered configuration files,
//! [`index`] holds the immutable per-index configuration discovered from the index
//! directory, and [`load`] ties the configuration sources together.

mod environment;
pub mod index;
pub mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
