//! Task store backends.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlTaskStore;
pub use memory::InMemoryTaskStore;
