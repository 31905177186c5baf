//! Read-only projections over the task store.
//!
//! Page tokens are opaque to callers. They encode the `(created_at_ms, id)`
//! position of the last record returned and the next page resumes strictly
//! after it, so inserts made while paging never cause skips or repeats.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::store::{Cursor, PageRequest, TaskFilter, TaskStore};
use crate::core::task::TaskRecord;
use crate::util::serde::TaskId;

const TOKEN_PREFIX: &str = "v1.";

/// One page of `ListTasks` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    /// Records in creation order.
    pub tasks: Vec<TaskRecord>,
    /// Token for the next page; `None` on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Encode a listing position as a page token.
#[must_use]
pub fn encode_page_token(cursor: Cursor) -> String {
    format!("{TOKEN_PREFIX}{:x}.{:x}", cursor.created_at_ms, cursor.id)
}

/// Decode a page token produced by [`encode_page_token`].
///
/// # Errors
///
/// [`SchedulerError::InvalidArgument`] for anything else.
pub fn decode_page_token(token: &str) -> Result<Cursor, SchedulerError> {
    let invalid = || SchedulerError::invalid(format!("invalid page token `{token}`"));
    let body = token.strip_prefix(TOKEN_PREFIX).ok_or_else(invalid)?;
    let (created, id) = body.split_once('.').ok_or_else(invalid)?;
    Ok(Cursor {
        created_at_ms: u128::from_str_radix(created, 16).map_err(|_| invalid())?,
        id: TaskId::from_str_radix(id, 16).map_err(|_| invalid())?,
    })
}

/// Get/list access to task records.
pub struct QueryService<S: TaskStore + ?Sized> {
    store: Arc<S>,
    default_page_size: usize,
    max_page_size: usize,
}

impl<S: TaskStore + ?Sized> QueryService<S> {
    /// Create a query service over `store`.
    pub const fn new(store: Arc<S>, default_page_size: usize, max_page_size: usize) -> Self {
        Self {
            store,
            default_page_size,
            max_page_size,
        }
    }

    /// Fetch one task.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotFound`] for unknown ids,
    /// [`SchedulerError::Unavailable`] when the store is down.
    pub fn get(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        Ok(self.store.get(id)?)
    }

    /// List tasks matching `filter`, ordered by creation time then id.
    ///
    /// `page_size` defaults to the configured default; an empty token means
    /// the first page.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidArgument`] for malformed tokens, a page size
    /// of zero or above the maximum, or an inverted time range.
    pub fn list(
        &self,
        filter: &TaskFilter,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<TaskPage, SchedulerError> {
        let limit = page_size.unwrap_or(self.default_page_size);
        if limit == 0 || limit > self.max_page_size {
            return Err(SchedulerError::invalid(format!(
                "page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        if let (Some(after), Some(before)) = (filter.created_after_ms, filter.created_before_ms) {
            if after > before {
                return Err(SchedulerError::invalid(
                    "created_after_ms must not be later than created_before_ms",
                ));
            }
        }
        let after = match page_token {
            Some(token) if !token.is_empty() => Some(decode_page_token(token)?),
            _ => None,
        };

        let page = self.store.list(filter, PageRequest { after, limit })?;
        Ok(TaskPage {
            tasks: page.tasks,
            next_page_token: page.next.map(encode_page_token),
        })
    }
}
