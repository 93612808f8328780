//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{GatekeeperError, Result};

use super::clock::Clock;
use super::decision::RateLimitResult;
use super::key::WindowKey;
use super::rules::{ActionPolicy, PolicySet};
use super::store::WindowStore;
use super::sweeper::Sweeper;

/// The rate limiter shared by every request handler.
///
/// Construct one at startup and hand it out by `Arc`. Each limiter owns
/// its own window store, so tests can build isolated instances freely.
pub struct RateLimiter {
    /// Counting windows indexed by (action, identifier)
    store: Arc<WindowStore>,
    /// Per-action quotas used by [`check_action`](Self::check_action)
    policies: RwLock<PolicySet>,
    /// Background eviction, if started
    sweeper: Option<Sweeper>,
}

impl RateLimiter {
    /// Create a limiter on the wall clock with the built-in policies.
    pub fn new() -> Self {
        Self::from_store(WindowStore::new())
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::from_store(WindowStore::with_clock(clock))
    }

    fn from_store(store: WindowStore) -> Self {
        Self {
            store: Arc::new(store),
            policies: RwLock::new(PolicySet::default()),
            sweeper: None,
        }
    }

    /// Replace the policy table.
    pub fn with_policies(self, policies: PolicySet) -> Self {
        self.set_policies(policies);
        self
    }

    /// Start evicting expired windows every `interval`.
    ///
    /// Must be called from within a tokio runtime. Replaces any sweeper
    /// already running.
    pub fn with_sweeper(mut self, interval: Duration) -> Self {
        self.sweeper = Some(Sweeper::spawn(self.store.clone(), interval));
        self
    }

    /// Check the rate limit for one request.
    ///
    /// Counts the request against the `(action, identifier)` window and
    /// reports whether it may proceed. Never blocks and never fails.
    pub fn check_rate_limit(
        &self,
        identifier: &str,
        action: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> RateLimitResult {
        let key = WindowKey::new(action, identifier);
        self.store.check(key, max_requests, window_ms)
    }

    /// Check the rate limit for one request using the policy configured
    /// for `action`.
    pub fn check_action(&self, identifier: &str, action: &str) -> Result<RateLimitResult> {
        let policy = self
            .policy(action)
            .ok_or_else(|| GatekeeperError::UnknownAction(action.to_string()))?;
        Ok(self.check_rate_limit(identifier, action, policy.max_requests, policy.window_ms))
    }

    /// The policy configured for `action`.
    pub fn policy(&self, action: &str) -> Option<ActionPolicy> {
        self.policies.read().get(action).copied()
    }

    /// Update the policy table.
    ///
    /// Windows already open keep their `reset_at`; the new quota applies
    /// from the next check.
    pub fn set_policies(&self, policies: PolicySet) {
        debug!(actions = policies.actions.len(), "Updating rate limit policies");
        *self.policies.write() = policies;
    }

    /// Get the current policy table.
    pub fn policies(&self) -> PolicySet {
        self.policies.read().clone()
    }

    /// Evict expired windows now, independent of the background sweeper.
    pub fn sweep(&self) -> usize {
        let evicted = self.store.sweep();
        debug!(evicted, "Manual sweep");
        evicted
    }

    /// Current time according to the limiter's clock.
    pub fn now_ms(&self) -> i64 {
        self.store.now_ms()
    }

    /// The underlying window store.
    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    /// Whether a background sweeper is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.as_ref().is_some_and(Sweeper::is_running)
    }

    /// Get the number of windows currently held.
    pub fn window_count(&self) -> usize {
        self.store.len()
    }

    /// Clear all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Stop the background sweeper, if any, and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.stop().await;
        }
        info!(windows = self.store.len(), "Rate limiter shut down");
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn limiter_at(start_ms: i64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let limiter = RateLimiter::with_clock(clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.window_count(), 0);
        assert!(!limiter.is_sweeping());
    }

    #[test]
    fn test_check_rate_limit_exhausts_and_resets() {
        let (clock, limiter) = limiter_at(0);

        for expected in [2, 1, 0] {
            let result = limiter.check_rate_limit("1.2.3.4", "login", 3, 1_000);
            assert!(result.success);
            assert_eq!(result.remaining, expected);
            clock.advance(100);
        }

        let rejected = limiter.check_rate_limit("1.2.3.4", "login", 3, 1_000);
        assert!(!rejected.success);
        assert_eq!(rejected.reset_at, 1_000);

        clock.set(1_000);
        let result = limiter.check_rate_limit("1.2.3.4", "login", 3, 1_000);
        assert!(result.success);
        assert_eq!(result.remaining, 2);
        assert_eq!(result.reset_at, 2_000);
    }

    #[test]
    fn test_check_action_uses_login_policy() {
        let (clock, limiter) = limiter_at(0);

        for _ in 0..5 {
            assert!(limiter.check_action("10.0.0.1", "login").unwrap().success);
        }

        let rejected = limiter.check_action("10.0.0.1", "login").unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.limit, 5);
        assert_eq!(rejected.reset_at, 900_000);

        let throttled = rejected.throttled("login", clock.now_ms()).unwrap();
        assert_eq!(throttled.retry_after_minutes, 15);
    }

    #[test]
    fn test_check_action_unknown() {
        let limiter = RateLimiter::new();
        let result = limiter.check_action("10.0.0.1", "download");
        assert!(matches!(result, Err(GatekeeperError::UnknownAction(a)) if a == "download"));
        assert_eq!(limiter.window_count(), 0);
    }

    #[test]
    fn test_exhausting_login_leaves_signup_untouched() {
        let (_clock, limiter) = limiter_at(0);

        for _ in 0..6 {
            limiter.check_action("x", "login").unwrap();
        }
        assert!(!limiter.check_action("x", "login").unwrap().success);

        let signup = limiter.check_action("x", "signup").unwrap();
        assert!(signup.success);
        assert_eq!(signup.remaining, 2);
    }

    #[test]
    fn test_custom_policies() {
        let (_clock, limiter) = limiter_at(0);
        let mut policies = PolicySet::empty();
        policies.insert("download", ActionPolicy::new(1, 60_000));
        let limiter = limiter.with_policies(policies);

        assert!(limiter.check_action("x", "download").unwrap().success);
        assert!(!limiter.check_action("x", "download").unwrap().success);
        assert!(limiter.check_action("x", "login").is_err());
    }

    #[test]
    fn test_manual_sweep() {
        let (clock, limiter) = limiter_at(0);
        limiter.check_rate_limit("a", "login", 5, 100);
        limiter.check_rate_limit("b", "login", 5, 10_000);

        clock.set(500);
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.window_count(), 1);
    }

    #[test]
    fn test_clear_windows() {
        let limiter = RateLimiter::new();
        limiter.check_rate_limit("a", "login", 5, 60_000);
        assert_eq!(limiter.window_count(), 1);

        limiter.clear();
        assert_eq!(limiter.window_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_lifecycle() {
        let (clock, limiter) = limiter_at(0);
        let limiter = limiter.with_sweeper(Duration::from_secs(600));
        assert!(limiter.is_sweeping());

        limiter.check_rate_limit("a", "login", 5, 1_000);
        clock.set(10_000);

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(limiter.window_count(), 0);

        limiter.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_one_budget() {
        let limiter = Arc::new(RateLimiter::new());

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check_action("shared", "signup").unwrap() })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let admitted = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|r| r.success)
            .count();
        assert_eq!(admitted, 3);
    }
}
