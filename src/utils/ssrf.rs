use url::Url;

use crate::config::Config;

/// Validates an upstream base URL before any socket is opened toward it.
///
/// Order of checks: config bypass, scheme (https required in production),
/// private-range denylist, then the exact-host allowlist.
pub fn check_upstream_url(raw: &str, config: &Config) -> Result<(), String> {
    if config.disable_ssrf_protection {
        return Ok(());
    }

    let url = Url::parse(raw).map_err(|e| format!("invalid upstream URL '{}': {}", raw, e))?;

    if config.is_production() && url.scheme() != "https" {
        return Err(format!("upstream URL '{}' must use https", raw));
    }

    let host = url
        .host_str()
        .ok_or_else(|| format!("upstream URL '{}' has no host", raw))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();

    if is_private_host(&host) {
        return Err(format!("upstream host '{}' is in a private range", host));
    }

    if !config.allowed_upstream_hosts.is_empty()
        && !config.allowed_upstream_hosts.iter().any(|h| h == &host)
    {
        return Err(format!("upstream host '{}' is not in the allowlist", host));
    }

    Ok(())
}

fn is_private_host(host: &str) -> bool {
    if host == "localhost" || host == "::1" {
        return true;
    }
    for prefix in ["127.", "10.", "192.168.", "0.", "169.254."] {
        if host.starts_with(prefix) {
            return true;
        }
    }
    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next() {
            if let Ok(octet) = second.parse::<u8>() {
                if (16..=31).contains(&octet) {
                    return true;
                }
            }
        }
    }
    // IPv6 link-local and unique-local literals.
    if host.contains(':') && (host.starts_with("fc00:") || host.starts_with("fe80:") || host.starts_with("fd")) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config(production: bool, allowlist: Vec<&str>, disabled: bool) -> Config {
        Config {
            host: "0.0.0.0".to_string(),
            port: 4000,
            database_url: "test.db".to_string(),
            encryption_key: "00".repeat(32),
            log_level: "info".to_string(),
            app_env: if production { "production" } else { "development" }.to_string(),
            base_url: "http://localhost:4000".to_string(),
            google_client_id: None,
            google_client_secret: None,
            google_redirect_uri: None,
            google_scopes: None,
            openai_client_id: None,
            openai_redirect_uri: None,
            allowed_upstream_hosts: allowlist.into_iter().map(|s| s.to_string()).collect(),
            disable_ssrf_protection: disabled,
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 60,
            global_rate_limit_max: 1000,
            admin_session_ttl_hours: 168,
        }
    }

    #[test]
    fn test_private_ranges_rejected() {
        let config = test_config(false, vec![], false);
        for bad in [
            "http://127.0.0.1:8080",
            "http://10.1.2.3",
            "http://172.16.0.1",
            "http://172.31.255.255",
            "http://192.168.1.1",
            "http://0.0.0.0",
            "http://169.254.169.254/latest/meta-data",
            "http://localhost:3000",
            "http://[::1]:8080",
            "http://[fe80::1]",
            "http://[fd12:3456::1]",
        ] {
            assert!(check_upstream_url(bad, &config).is_err(), "{} must be rejected", bad);
        }
    }

    #[test]
    fn test_non_private_172_allowed() {
        let config = test_config(false, vec!["172.15.0.1", "172.32.0.1"], false);
        assert!(check_upstream_url("http://172.15.0.1", &config).is_ok());
        assert!(check_upstream_url("http://172.32.0.1", &config).is_ok());
    }

    #[test]
    fn test_allowlist_exact_case_insensitive() {
        let config = test_config(false, vec!["api.openai.com"], false);
        assert!(check_upstream_url("https://api.openai.com/v1", &config).is_ok());
        assert!(check_upstream_url("https://API.OPENAI.COM/v1", &config).is_ok());
        assert!(check_upstream_url("https://evil-api.openai.com.example.com", &config).is_err());
        assert!(check_upstream_url("https://api.anthropic.com", &config).is_err());
    }

    #[test]
    fn test_production_requires_https() {
        let config = test_config(true, vec!["api.openai.com"], false);
        assert!(check_upstream_url("http://api.openai.com", &config).is_err());
        assert!(check_upstream_url("https://api.openai.com", &config).is_ok());

        let dev = test_config(false, vec!["api.openai.com"], false);
        assert!(check_upstream_url("http://api.openai.com", &dev).is_ok());
    }

    #[test]
    fn test_disabled_guard_allows_anything() {
        let config = test_config(true, vec!["api.openai.com"], true);
        assert!(check_upstream_url("http://127.0.0.1:9999", &config).is_ok());
    }

    #[test]
    fn test_parse_failure_rejected() {
        let config = test_config(false, vec![], false);
        assert!(check_upstream_url("not a url", &config).is_err());
        assert!(check_upstream_url("", &config).is_err());
    }

    #[test]
    fn test_fd_prefix_only_applies_to_ipv6_literals() {
        let config = test_config(false, vec!["fdn.example.com"], false);
        assert!(check_upstream_url("https://fdn.example.com", &config).is_ok());
    }
}
