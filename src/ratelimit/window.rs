//! Fixed counting window for one (action, identifier) pair.

/// The current counting window of a single key.
///
/// A window is opened by the first request for its key and counts every
/// admitted request until `reset_at`. Once `now >= reset_at` the window is
/// expired and must be replaced rather than incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    /// Requests admitted in this window, always at least 1
    count: u32,
    /// Absolute expiry time in milliseconds since the Unix epoch
    reset_at: i64,
}

impl RateWindow {
    /// Open a fresh window at `now_ms`, counting the opening request.
    pub fn open(now_ms: i64, window_ms: i64) -> Self {
        Self {
            count: 1,
            reset_at: now_ms.saturating_add(window_ms),
        }
    }

    /// Requests counted so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// When this window expires.
    pub fn reset_at(&self) -> i64 {
        self.reset_at
    }

    /// A window expiring exactly at `now_ms` is already expired.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.reset_at
    }

    /// Whether the sweeper may evict this window.
    ///
    /// Strictly past `reset_at`, unlike [`is_expired`](Self::is_expired).
    pub fn is_stale(&self, now_ms: i64) -> bool {
        self.reset_at < now_ms
    }

    /// Count one more request if the quota allows it.
    ///
    /// Returns `false` without touching the window when `max_requests`
    /// has already been reached.
    pub fn try_increment(&mut self, max_requests: u32) -> bool {
        if self.count >= max_requests {
            return false;
        }
        self.count += 1;
        true
    }

    /// Requests left before the window is exhausted.
    pub fn remaining(&self, max_requests: u32) -> u32 {
        max_requests.saturating_sub(self.count)
    }
}
