pub mod chunk;
pub mod file;

pub use chunk::*;
pub use file::*;

#[cfg(test)]
pub(crate) use file::fixtures;
