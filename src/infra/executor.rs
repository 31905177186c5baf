//! Built-in executor interpreting `{"op": ...}` payloads.
//!
//! | op      | fields                 | result                               |
//! |---------|------------------------|--------------------------------------|
//! | `sleep` | `ms`                   | `{"slept_ms": ms}`                   |
//! | `timer` | `seconds`, `message`   | `{"message": message, "fired_at_ms"}`|
//! | `echo`  | `value`                | `value`                              |
//! | `fail`  | `message`              | fails with `message`                 |
//!
//! Waiting ops return [`ExecutionError::Cancelled`] as soon as the execution
//! context is cancelled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::core::executor::{ExecutionContext, ExecutionError, ExecutionResult, TaskExecutor};
use crate::util::clock::now_ms;

/// Operations understood by [`OpExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Wait for `ms` milliseconds.
    Sleep {
        /// Duration in milliseconds.
        ms: u64,
    },
    /// Wait for `seconds`, then report `message`.
    Timer {
        /// Duration in seconds.
        seconds: u64,
        /// Text returned when the timer fires.
        #[serde(default)]
        message: String,
    },
    /// Return `value` unchanged.
    Echo {
        /// Value to return.
        value: serde_json::Value,
    },
    /// Fail with `message`.
    Fail {
        /// Failure text.
        message: String,
    },
}

/// Executor for [`Op`] payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpExecutor;

impl OpExecutor {
    async fn wait(duration: Duration, ctx: &ExecutionContext) -> Result<(), ExecutionError> {
        tokio::select! {
            () = ctx.cancelled() => Err(ExecutionError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[async_trait]
impl TaskExecutor for OpExecutor {
    async fn execute(&self, payload: serde_json::Value, ctx: ExecutionContext) -> ExecutionResult {
        let op: Op = serde_json::from_value(payload)
            .map_err(|e| ExecutionError::failed(format!("unsupported payload: {e}")))?;
        debug!(task_id = ctx.task_id, ?op, "executing op");

        match op {
            Op::Sleep { ms } => {
                Self::wait(Duration::from_millis(ms), &ctx).await?;
                Ok(json!({ "slept_ms": ms }))
            }
            Op::Timer { seconds, message } => {
                Self::wait(Duration::from_secs(seconds), &ctx).await?;
                let fired_at_ms = u64::try_from(now_ms()).unwrap_or(u64::MAX);
                Ok(json!({ "message": message, "fired_at_ms": fired_at_ms }))
            }
            Op::Echo { value } => Ok(value),
            Op::Fail { message } => Err(ExecutionError::Failed(message)),
        }
    }
}
