//! Builders to construct scheduler components from configuration.

pub mod scheduler_builder;

pub use scheduler_builder::{
    build_audit_sink, build_scheduler, build_scheduler_with_audit, open_store, DynScheduler,
};
