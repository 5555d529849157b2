use once_cell::sync::Lazy;

// Hosts that upstream base URLs may point at when no explicit allowlist is
// configured. Exact, case-insensitive host matches only.
const DEFAULT_ALLOWED_HOSTS: [&str; 5] = [
    "api.openai.com",
    "api.anthropic.com",
    "generativelanguage.googleapis.com",
    "oauth2.googleapis.com",
    "auth.openai.com",
];

#[derive(Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub encryption_key: String,
    pub log_level: String,
    pub app_env: String,
    pub base_url: String,

    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_redirect_uri: Option<String>,
    pub google_scopes: Option<String>,
    pub openai_client_id: Option<String>,
    pub openai_redirect_uri: Option<String>,

    pub allowed_upstream_hosts: Vec<String>,
    pub disable_ssrf_protection: bool,

    pub rate_limit_window_ms: i64,
    pub rate_limit_max_requests: i32,
    pub global_rate_limit_max: i32,

    pub admin_session_ttl_hours: i64,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

fn get_env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn require_env_var(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| panic!("{} must be set", key))
}

fn parse_host_list(raw: Option<String>) -> Vec<String> {
    match raw {
        Some(s) if !s.trim().is_empty() => s
            .split(',')
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect(),
        _ => DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| Config {
    host: get_env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
    port: get_env_var("PORT").unwrap_or(4000),
    database_url: require_env_var("DATABASE_URL"),
    encryption_key: require_env_var("ENCRYPTION_KEY"),
    log_level: get_env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
    app_env: get_env_var("APP_ENV").unwrap_or_else(|| "development".to_string()),
    base_url: get_env_var("BASE_URL").unwrap_or_else(|| "http://localhost:4000".to_string()),

    google_client_id: get_env_var("GOOGLE_CLIENT_ID"),
    google_client_secret: get_env_var("GOOGLE_CLIENT_SECRET"),
    google_redirect_uri: get_env_var("GOOGLE_REDIRECT_URI"),
    google_scopes: get_env_var("GOOGLE_SCOPES"),
    openai_client_id: get_env_var("OPENAI_CLIENT_ID"),
    openai_redirect_uri: get_env_var("OPENAI_REDIRECT_URI"),

    allowed_upstream_hosts: parse_host_list(get_env_var("ALLOWED_UPSTREAM_HOSTS")),
    disable_ssrf_protection: get_env_var("DISABLE_SSRF_PROTECTION").unwrap_or(false),

    rate_limit_window_ms: get_env_var("RATE_LIMIT_WINDOW_MS").unwrap_or(60_000),
    rate_limit_max_requests: get_env_var("RATE_LIMIT_MAX_REQUESTS").unwrap_or(60),
    global_rate_limit_max: get_env_var("GLOBAL_RATE_LIMIT_MAX").unwrap_or(1000),

    admin_session_ttl_hours: get_env_var("ADMIN_SESSION_TTL_HOURS").unwrap_or(168),
});
