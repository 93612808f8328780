//! In-memory window store and the fixed-window admission check.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::decision::RateLimitResult;
use super::key::WindowKey;
use super::window::RateWindow;

/// Process-local map from window key to its current counting window.
///
/// Every read-check-increment runs under the dashmap shard lock held by
/// [`DashMap::entry`], so concurrent checks on the same key are
/// serialized and can never admit more than the quota. The sweeper's
/// `retain` takes the same shard locks.
pub struct WindowStore {
    windows: DashMap<WindowKey, RateWindow>,
    clock: Arc<dyn Clock>,
}

impl WindowStore {
    /// Create an empty store on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Current time according to the store's clock.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Decide whether one more request for `key` may proceed.
    ///
    /// Fixed-window counting: an absent or expired window is replaced by a
    /// fresh one and the request is admitted; a live window admits until
    /// its count reaches `max_requests` and then rejects without being
    /// modified.
    pub fn check(&self, key: WindowKey, max_requests: u32, window_ms: i64) -> RateLimitResult {
        let now = self.clock.now_ms();

        trace!(key = %key, max_requests, window_ms, "Checking rate limit");

        if max_requests == 0 {
            let reset_at = self
                .windows
                .get(&key)
                .filter(|w| !w.is_expired(now))
                .map(|w| w.reset_at())
                .unwrap_or_else(|| now.saturating_add(window_ms));
            debug!(key = %key, "Zero quota, rejecting");
            return RateLimitResult::rejected(max_requests, reset_at);
        }

        match self.windows.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now) {
                    let window = RateWindow::open(now, window_ms);
                    debug!(key = %entry.key(), reset_at = window.reset_at(), "Replacing expired window");
                    entry.insert(window);
                    return RateLimitResult::admitted(
                        max_requests,
                        window.remaining(max_requests),
                        window.reset_at(),
                    );
                }

                let admitted = entry.get_mut().try_increment(max_requests);
                let window = *entry.get();
                if admitted {
                    RateLimitResult::admitted(
                        max_requests,
                        window.remaining(max_requests),
                        window.reset_at(),
                    )
                } else {
                    debug!(
                        key = %entry.key(),
                        count = window.count(),
                        reset_at = window.reset_at(),
                        "Rate limit exceeded"
                    );
                    RateLimitResult::rejected(max_requests, window.reset_at())
                }
            }
            Entry::Vacant(entry) => {
                let window = RateWindow::open(now, window_ms);
                debug!(key = %entry.key(), reset_at = window.reset_at(), "Opening rate limit window");
                entry.insert(window);
                RateLimitResult::admitted(
                    max_requests,
                    window.remaining(max_requests),
                    window.reset_at(),
                )
            }
        }
    }

    /// Evict every window whose `reset_at` is strictly in the past.
    ///
    /// Returns the number of evicted windows.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut evicted = 0;
        self.windows.retain(|_, window| {
            let stale = window.is_stale(now);
            if stale {
                evicted += 1;
            }
            !stale
        });
        evicted
    }

    /// The current window for `key`, including expired ones not yet swept.
    pub fn get(&self, key: &WindowKey) -> Option<RateWindow> {
        self.windows.get(key).map(|w| *w)
    }

    /// Number of windows physically present.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether the store holds no windows.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop every window.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}
