//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock reports a time before the epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Milliseconds remaining until `deadline_ms`, saturating at zero and at `u64::MAX`.
#[must_use]
pub fn millis_until(deadline_ms: u128, now_ms: u128) -> u64 {
    u64::try_from(deadline_ms.saturating_sub(now_ms)).unwrap_or(u64::MAX)
}
