use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

/// One fixed counting window for a single scope key.
#[derive(Debug, Clone)]
struct RateWindow {
    count: i64,
    window_start: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub reset_at: i64,
}

/// Fixed-window request counter keyed by scope (`global` or `key:<uuid>`).
///
/// The window is reset when it elapses, not slid. State is process-local.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str, max: i64, window_ms: i64) -> RateDecision {
        self.check_at(key, max, window_ms, Utc::now().timestamp_millis())
    }

    fn check_at(&self, key: &str, max: i64, window_ms: i64, now: i64) -> RateDecision {
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        match windows.get_mut(key) {
            Some(window) if now - window.window_start < window_ms => {
                if window.count >= max {
                    RateDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at: window.window_start + window_ms,
                    }
                } else {
                    window.count += 1;
                    RateDecision {
                        allowed: true,
                        remaining: max - window.count,
                        reset_at: window.window_start + window_ms,
                    }
                }
            }
            _ => {
                windows.insert(
                    key.to_string(),
                    RateWindow {
                        count: 1,
                        window_start: now,
                    },
                );
                RateDecision {
                    allowed: true,
                    remaining: max - 1,
                    reset_at: now + window_ms,
                }
            }
        }
    }

    /// Drops windows whose start is older than `cutoff`. Called by the janitor.
    pub fn evict_started_before(&self, cutoff: i64) {
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        let before = windows.len();
        windows.retain(|_, w| w.window_start >= cutoff);
        let removed = before - windows.len();
        if removed > 0 {
            debug!("rate limiter janitor evicted {} stale windows", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_n_allowed_then_denied() {
        let limiter = RateLimiter::new();
        let now = 1_000_000;
        for i in 0..3 {
            let d = limiter.check_at("key:abc", 3, 60_000, now + i);
            assert!(d.allowed, "call {} should be allowed", i);
        }
        let denied = limiter.check_at("key:abc", 3, 60_000, now + 10);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, now + 60_000);
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = RateLimiter::new();
        let now = 5_000;
        assert_eq!(limiter.check_at("g", 3, 60_000, now).remaining, 2);
        assert_eq!(limiter.check_at("g", 3, 60_000, now).remaining, 1);
        assert_eq!(limiter.check_at("g", 3, 60_000, now).remaining, 0);
    }

    #[test]
    fn test_window_resets_after_elapse() {
        let limiter = RateLimiter::new();
        let now = 1_000;
        assert!(limiter.check_at("k", 1, 60_000, now).allowed);
        assert!(!limiter.check_at("k", 1, 60_000, now + 59_999).allowed);
        let fresh = limiter.check_at("k", 1, 60_000, now + 60_000);
        assert!(fresh.allowed);
        assert_eq!(fresh.reset_at, now + 120_000);
    }

    #[test]
    fn test_scopes_are_independent() {
        let limiter = RateLimiter::new();
        let now = 0;
        assert!(limiter.check_at("key:a", 1, 60_000, now).allowed);
        assert!(limiter.check_at("key:b", 1, 60_000, now).allowed);
        assert!(!limiter.check_at("key:a", 1, 60_000, now + 1).allowed);
    }

    #[test]
    fn test_eviction() {
        let limiter = RateLimiter::new();
        limiter.check_at("old", 10, 60_000, 0);
        limiter.check_at("new", 10, 60_000, 400_000);
        limiter.evict_started_before(100_000);
        // Evicted window restarts fresh; surviving window keeps its count.
        assert_eq!(limiter.check_at("old", 10, 60_000, 400_001).remaining, 9);
        assert_eq!(limiter.check_at("new", 10, 60_000, 400_001).remaining, 8);
    }
}
