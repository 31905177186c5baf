//! Shared identifier and ordering types used across the scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task identifier. Allocated monotonically by the task store and never reused.
pub type TaskId = u64;

/// Dispatch priority. Higher values are dequeued first.
///
/// The accepted range is bounded by `SchedulerConfig::max_priority`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Background work.
    pub const LOW: Self = Self(0);
    /// Default for submissions that carry no hint.
    pub const NORMAL: Self = Self(4);
    /// Latency-sensitive work.
    pub const HIGH: Self = Self(7);
    /// Highest priority accepted by the default configuration.
    pub const CRITICAL: Self = Self(9);

    /// Raw priority value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}
