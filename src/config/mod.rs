//! Configuration models for the worker pool, store backend and limits.

pub mod pool;
pub mod scheduler;

pub use pool::WorkerPoolConfig;
pub use scheduler::{SchedulerConfig, StoreBackendConfig, CONFIG_PATH_ENV};
