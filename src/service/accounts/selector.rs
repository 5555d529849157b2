use chrono::Utc;
use tracing::{debug, warn};

use crate::database::oauth_account::OAuthAccount;
use crate::database::DbResult;
use crate::service::accounts::health::{HealthRegistry, MIN_USABLE_SCORE};

const HEALTH_WEIGHT: f64 = 0.6;
const RECENCY_WEIGHT: f64 = 0.4;
const MINUTE_MS: i64 = 60_000;

/// Picks the OAuth account that should serve the next request for a provider.
///
/// Accounts below `MIN_USABLE_SCORE` are avoided unless every account is
/// below it, in which case the least-bad one is returned with a warning.
/// Returns `Ok(None)` when the provider has no active accounts; the caller
/// then advances to the next fallback-chain candidate.
pub async fn select_account(
    registry: &HealthRegistry,
    provider_id: &str,
) -> DbResult<Option<OAuthAccount>> {
    let accounts = OAuthAccount::list_active_by_provider(provider_id)?;
    let now = Utc::now().timestamp_millis();
    let Some(selected) = pick_account(registry, &accounts, now) else {
        return Ok(None);
    };

    registry.mark_used(&selected.id, now);
    let account_id = selected.id.clone();
    tokio::spawn(async move {
        if let Err(e) = OAuthAccount::touch_last_used(&account_id, now) {
            warn!("failed to persist last_used_at for account {}: {}", account_id, e);
        }
    });

    Ok(Some(selected))
}

fn pick_account(
    registry: &HealthRegistry,
    accounts: &[OAuthAccount],
    now: i64,
) -> Option<OAuthAccount> {
    if accounts.is_empty() {
        return None;
    }

    // (account, current score, composite)
    let mut scored: Vec<(&OAuthAccount, f64, f64)> = Vec::with_capacity(accounts.len());
    for account in accounts {
        let state = registry.snapshot(&account.id, now);
        let last_used = state.last_used.or(account.last_used_at);
        let recency = match last_used {
            Some(at) => (((now - at).max(0) / MINUTE_MS) as f64).min(100.0),
            None => 100.0,
        };
        let composite = HEALTH_WEIGHT * state.score + RECENCY_WEIGHT * recency;
        scored.push((account, state.score, composite));
    }

    let any_usable = scored.iter().any(|(_, score, _)| *score >= MIN_USABLE_SCORE);

    if !any_usable {
        // Strictly-greater comparison keeps the LRU-ordered first entry on ties.
        let mut best = &scored[0];
        for item in &scored[1..] {
            if item.1 > best.1 {
                best = item;
            }
        }
        warn!(
            "all oauth accounts unhealthy; using account {} with score {:.1}",
            best.0.id, best.1
        );
        return Some(best.0.clone());
    }

    let mut best: Option<&(&OAuthAccount, f64, f64)> = None;
    for item in scored.iter().filter(|(_, score, _)| *score >= MIN_USABLE_SCORE) {
        match best {
            Some(current) if current.2 >= item.2 => {}
            _ => best = Some(item),
        }
    }
    let best = best?;
    debug!(
        "selected oauth account {} (score {:.1}, composite {:.1})",
        best.0.id, best.1, best.2
    );
    Some(best.0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, last_used_at: Option<i64>) -> OAuthAccount {
        OAuthAccount {
            id: id.to_string(),
            provider_id: "prov-1".to_string(),
            encrypted_access_token: "sealed".to_string(),
            encrypted_refresh_token: None,
            expires_at: i64::MAX,
            email: None,
            health_score: 70,
            last_used_at,
            is_active: true,
            created_at: 0,
        }
    }

    #[test]
    fn test_empty_pool_yields_none() {
        let registry = HealthRegistry::new();
        assert!(pick_account(&registry, &[], 0).is_none());
    }

    #[test]
    fn test_prefers_least_recently_used_at_equal_health() {
        let registry = HealthRegistry::new();
        let now = 10 * MINUTE_MS;
        let accounts = vec![
            account("stale", Some(0)),            // recency 10
            account("fresh", Some(now - MINUTE_MS)), // recency 1
        ];
        let picked = pick_account(&registry, &accounts, now).unwrap();
        assert_eq!(picked.id, "stale");
    }

    #[test]
    fn test_never_used_counts_as_max_recency() {
        let registry = HealthRegistry::new();
        let now = 5 * MINUTE_MS;
        let accounts = vec![account("used", Some(now - MINUTE_MS)), account("never", None)];
        let picked = pick_account(&registry, &accounts, now).unwrap();
        assert_eq!(picked.id, "never");
    }

    #[test]
    fn test_health_outweighs_recency() {
        let registry = HealthRegistry::new();
        let now = 200 * MINUTE_MS;
        // Drive "sick" down to 70 - 45 = 25: usable but far below "well".
        registry.record_failure("sick");
        registry.record_failure("sick");
        registry.record_failure("sick");
        let accounts = vec![account("sick", Some(0)), account("well", Some(now))];
        // sick: 0.6*25 + 0.4*100 = 55; well: 0.6*70 + 0.4*0 = 42.
        let picked = pick_account(&registry, &accounts, now).unwrap();
        assert_eq!(picked.id, "sick");

        registry.record_failure("sick"); // now 10: unusable
        let picked = pick_account(&registry, &accounts, now).unwrap();
        assert_eq!(picked.id, "well");
    }

    #[test]
    fn test_all_unhealthy_falls_back_to_best_score() {
        let registry = HealthRegistry::new();
        let now = MINUTE_MS;
        for _ in 0..4 {
            registry.record_failure("worse"); // 10
        }
        for _ in 0..4 {
            registry.record_failure("bad");
        }
        registry.record_success("bad"); // 12
        let accounts = vec![account("worse", None), account("bad", None)];
        let picked = pick_account(&registry, &accounts, now).unwrap();
        assert_eq!(picked.id, "bad");
    }

    #[test]
    fn test_tie_breaks_to_first_listed() {
        let registry = HealthRegistry::new();
        let now = MINUTE_MS;
        let accounts = vec![account("first", None), account("second", None)];
        let picked = pick_account(&registry, &accounts, now).unwrap();
        assert_eq!(picked.id, "first");
    }
}
