//! # Prometheus Task Scheduler
//!
//! A single-authority task scheduling engine: clients submit units of work,
//! the scheduler tracks their lifecycle, dispatches them to a bounded pool of
//! worker threads by priority, and lets clients query, list and cancel them.
//!
//! ## Core Problem Solved
//!
//! Long-running jobs (model inference, timers, batch steps) need more than a
//! thread pool:
//!
//! - **Observable lifecycle**: every task has a queryable record from the
//!   moment it is accepted until long after it finishes
//! - **Ordered admission**: higher priority first, FIFO among equals
//! - **Cancellation that can't corrupt state**: completion and cancel race
//!   through compare-and-swap; exactly one wins
//! - **Restart safety**: with the file store, queued work survives a restart
//!   and interrupted work is marked failed instead of vanishing
//!
//! ## Task lifecycle
//!
//! ```text
//! Created ──► Queued ──► Running ──► Succeeded | Failed | Cancelled
//!    └───────────┴──────────┴──────► Cancelled
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prometheus_task_scheduler::builders::build_scheduler;
//! use prometheus_task_scheduler::config::SchedulerConfig;
//! use prometheus_task_scheduler::core::{ScheduleOptions, TaskState};
//! use prometheus_task_scheduler::infra::OpExecutor;
//!
//! let scheduler = build_scheduler(&SchedulerConfig::from_env()?, OpExecutor)?;
//! scheduler.start()?;
//!
//! let id = scheduler.schedule(
//!     serde_json::json!({"op": "sleep", "ms": 5000}),
//!     ScheduleOptions::with_priority(5u8),
//! )?;
//! let ack = scheduler.cancel(id)?;
//! assert!(ack.is_pending() || ack.state == TaskState::Cancelled);
//!
//! scheduler.shutdown();
//! ```
//!
//! Transports mount [`runtime::SchedulerApi`], which implements the
//! [`runtime::SchedulerService`] trait over a scheduler.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: task model, store contract, queue, pool.
pub mod core;
/// Configuration models for the pool, store backend and limits.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters: store backends and the built-in executor.
pub mod infra;
/// Transport-neutral API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
