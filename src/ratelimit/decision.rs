//! Admission decisions and the retry message shown to throttled callers.

use serde::Serialize;

const MS_PER_MINUTE: i64 = 60_000;

/// The outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub success: bool,
    /// The quota this check was made against
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the caller gets a full quota back, in ms since the Unix epoch
    pub reset_at: i64,
}

impl RateLimitResult {
    pub(crate) fn admitted(limit: u32, remaining: u32, reset_at: i64) -> Self {
        Self {
            success: true,
            limit,
            remaining,
            reset_at,
        }
    }

    pub(crate) fn rejected(limit: u32, reset_at: i64) -> Self {
        Self {
            success: false,
            limit,
            remaining: 0,
            reset_at,
        }
    }

    /// Whole minutes until `reset_at`, rounded up and never negative.
    pub fn retry_after_minutes(&self, now_ms: i64) -> i64 {
        let wait = self.reset_at.saturating_sub(now_ms).max(0);
        wait / MS_PER_MINUTE + i64::from(wait % MS_PER_MINUTE != 0)
    }

    /// The user-facing rejection for `action`, or `None` if admitted.
    pub fn throttled(&self, action: &str, now_ms: i64) -> Option<Throttled> {
        if self.success {
            return None;
        }
        Some(Throttled {
            action: action.to_string(),
            retry_after_minutes: self.retry_after_minutes(now_ms),
        })
    }
}

/// A rejected request, rendered as a message for the end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throttled {
    /// The limited action
    pub action: String,
    /// Minutes until the caller may retry
    pub retry_after_minutes: i64,
}

impl std::fmt::Display for Throttled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = if self.retry_after_minutes == 1 {
            "minute"
        } else {
            "minutes"
        };
        write!(
            f,
            "Too many {} attempts. Please try again in {} {}.",
            self.action.replace('_', " "),
            self.retry_after_minutes,
            unit
        )
    }
}
