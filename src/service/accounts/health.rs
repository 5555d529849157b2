use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

pub const INITIAL_SCORE: f64 = 70.0;
pub const MIN_USABLE_SCORE: f64 = 20.0;

const SUCCESS_REWARD: f64 = 2.0;
const FAILURE_PENALTY: f64 = 15.0;
const RATE_LIMIT_PENALTY: f64 = 25.0;
const DECAY_PER_MINUTE: f64 = 1.0;
const MINUTE_MS: i64 = 60_000;

/// Ephemeral per-account health. Lost on restart; re-seeded at `INITIAL_SCORE`.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub score: f64,
    pub last_update: i64,
    pub last_used: Option<i64>,
}

/// Tracks one score per OAuth account id. All mutations for an account are
/// serialized behind the registry lock; no lock is held across await points.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    states: Mutex<HashMap<String, HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, account_id: &str) {
        self.apply(account_id, SUCCESS_REWARD, Utc::now().timestamp_millis());
    }

    pub fn record_failure(&self, account_id: &str) {
        self.apply(account_id, -FAILURE_PENALTY, Utc::now().timestamp_millis());
    }

    pub fn record_rate_limit(&self, account_id: &str) {
        self.apply(account_id, -RATE_LIMIT_PENALTY, Utc::now().timestamp_millis());
    }

    /// Current state with passive decay applied as of `now`. Seeds lazily.
    pub fn snapshot(&self, account_id: &str, now: i64) -> HealthState {
        let mut states = self.states.lock().expect("health registry lock poisoned");
        let state = states
            .entry(account_id.to_string())
            .or_insert_with(|| HealthState {
                score: INITIAL_SCORE,
                last_update: now,
                last_used: None,
            });
        HealthState {
            score: decayed_score(state, now),
            last_update: state.last_update,
            last_used: state.last_used,
        }
    }

    /// Stamped by the selector at the moment an account is chosen.
    pub fn mark_used(&self, account_id: &str, now: i64) {
        let mut states = self.states.lock().expect("health registry lock poisoned");
        let state = states
            .entry(account_id.to_string())
            .or_insert_with(|| HealthState {
                score: INITIAL_SCORE,
                last_update: now,
                last_used: None,
            });
        state.last_used = Some(now);
    }

    fn apply(&self, account_id: &str, delta: f64, now: i64) {
        let mut states = self.states.lock().expect("health registry lock poisoned");
        let state = states
            .entry(account_id.to_string())
            .or_insert_with(|| HealthState {
                score: INITIAL_SCORE,
                last_update: now,
                last_used: None,
            });
        state.score = (decayed_score(state, now) + delta).clamp(0.0, 100.0);
        state.last_update = now;
    }

    #[cfg(test)]
    fn rewind_last_update(&self, account_id: &str, by_ms: i64) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(account_id) {
            state.last_update -= by_ms;
        }
    }
}

fn decayed_score(state: &HealthState, now: i64) -> f64 {
    let elapsed_minutes = ((now - state.last_update) / MINUTE_MS).max(0) as f64;
    (state.score + elapsed_minutes * DECAY_PER_MINUTE).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    #[test]
    fn test_lazy_seed_at_initial() {
        let registry = HealthRegistry::new();
        let state = registry.snapshot("acc-1", now());
        assert_eq!(state.score, INITIAL_SCORE);
        assert_eq!(state.last_used, None);
    }

    #[test]
    fn test_success_reward_caps_at_100() {
        let registry = HealthRegistry::new();
        for _ in 0..40 {
            registry.record_success("acc-1");
        }
        assert_eq!(registry.snapshot("acc-1", now()).score, 100.0);
        registry.record_success("acc-1");
        assert_eq!(registry.snapshot("acc-1", now()).score, 100.0);
    }

    #[test]
    fn test_failure_and_rate_limit_floor_at_0() {
        let registry = HealthRegistry::new();
        for _ in 0..10 {
            registry.record_failure("acc-1");
        }
        assert_eq!(registry.snapshot("acc-1", now()).score, 0.0);

        for _ in 0..10 {
            registry.record_rate_limit("acc-2");
        }
        assert_eq!(registry.snapshot("acc-2", now()).score, 0.0);
    }

    #[test]
    fn test_event_deltas() {
        let registry = HealthRegistry::new();
        registry.record_success("a");
        assert_eq!(registry.snapshot("a", now()).score, 72.0);
        registry.record_failure("a");
        assert_eq!(registry.snapshot("a", now()).score, 57.0);
        registry.record_rate_limit("a");
        assert_eq!(registry.snapshot("a", now()).score, 32.0);
    }

    #[test]
    fn test_passive_decay_one_point_per_minute() {
        let registry = HealthRegistry::new();
        registry.record_failure("a"); // 55
        registry.rewind_last_update("a", 3 * MINUTE_MS);
        let state = registry.snapshot("a", now());
        assert_eq!(state.score, 58.0);
    }

    #[test]
    fn test_decay_applies_before_mutation() {
        let registry = HealthRegistry::new();
        registry.record_failure("a"); // 55
        registry.rewind_last_update("a", 2 * MINUTE_MS);
        registry.record_success("a"); // 55 + 2 decay + 2 reward
        assert_eq!(registry.snapshot("a", now()).score, 59.0);
    }

    #[test]
    fn test_score_stays_in_bounds_under_any_sequence() {
        let registry = HealthRegistry::new();
        for i in 0..200 {
            match i % 4 {
                0 => registry.record_success("a"),
                1 => registry.record_failure("a"),
                2 => registry.record_rate_limit("a"),
                _ => registry.record_success("a"),
            }
            let score = registry.snapshot("a", now()).score;
            assert!((0.0..=100.0).contains(&score), "score {} out of bounds", score);
        }
    }

    #[test]
    fn test_mark_used_sets_last_used() {
        let registry = HealthRegistry::new();
        let at = now();
        registry.mark_used("a", at);
        assert_eq!(registry.snapshot("a", at).last_used, Some(at));
    }
}
