//! Infrastructure adapters: task store backends and the built-in executor.

pub mod executor;
pub mod store;

pub use executor::{Op, OpExecutor};
pub use store::{InMemoryTaskStore, JsonlTaskStore};
