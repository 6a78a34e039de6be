mod base;
mod batch;
mod checkpoint_store;
mod connection;
mod elasticsearch;
mod espipe;
mod scheduler;
mod server;
mod sync;
mod workers;

pub use base::*;
pub use batch::*;
pub use checkpoint_store::*;
pub use connection::*;
pub use elasticsearch::*;
pub use espipe::*;
pub use scheduler::*;
pub use server::*;
pub use sync::*;
pub use workers::*;
