//! Turning source rows into search documents.

mod assembler;
mod extension;

pub use assembler::*;
pub use extension::*;
