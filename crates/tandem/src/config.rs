//! Server configuration, read from the environment.
//!
//! Every knob has a default that works for local development; the
//! production deployment sets the lot. Parse failures fall back to the
//! default with a logged warning — a typo in an env var should not take
//! the hub down.

use std::time::Duration;

use tandem_exec::DEFAULT_SANDBOX_URL;

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host.
    pub host: String,
    /// Bind port; if busy, the next `port_probes` ports are tried.
    pub port: u16,
    /// How many ports above `port` to probe before giving up.
    pub port_probes: u16,
    /// Shared secret for the locally-signed (HS256) token path.
    pub jwt_secret: Option<String>,
    /// PEM public key for the RS256 token path.
    pub jwt_public_key_pem: Option<String>,
    /// Federated identity credentials. Absence disables that path; the
    /// embedding binary wires the actual provider implementation.
    pub firebase_admin_key: Option<String>,
    /// Whether the development-token fallback is active.
    pub allow_dev_tokens: bool,
    /// Sandbox base URL.
    pub sandbox_url: String,
    /// Default member cap for new sessions.
    pub max_users_per_session: usize,
    /// Default guest policy for new sessions.
    pub allow_guests_default: bool,
    /// Connections one IP may open per rate-limit window.
    pub conn_rate_limit: usize,
    /// The rate-limit window.
    pub conn_rate_window: Duration,
    /// How long an empty session lives before the GC purges it.
    pub session_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            port_probes: 9,
            jwt_secret: None,
            jwt_public_key_pem: None,
            firebase_admin_key: None,
            allow_dev_tokens: true,
            sandbox_url: DEFAULT_SANDBOX_URL.to_string(),
            max_users_per_session: 10,
            allow_guests_default: false,
            conn_rate_limit: 10,
            conn_rate_window: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Builds a config from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or("HOST", defaults.host),
            port: env_parsed("PORT", defaults.port),
            port_probes: defaults.port_probes,
            jwt_secret: env_opt("JWT_SECRET"),
            jwt_public_key_pem: env_opt("JWT_PUBLIC_KEY_PEM"),
            firebase_admin_key: env_opt("FIREBASE_ADMIN_KEY"),
            allow_dev_tokens: env_parsed("ALLOW_DEV_TOKENS", defaults.allow_dev_tokens),
            sandbox_url: env_or("PISTON_API_URL", defaults.sandbox_url),
            max_users_per_session: env_parsed(
                "MAX_USERS_PER_SESSION",
                defaults.max_users_per_session,
            ),
            allow_guests_default: env_parsed(
                "ALLOW_GUESTS_DEFAULT",
                defaults.allow_guests_default,
            ),
            conn_rate_limit: env_parsed("CONN_RATE_LIMIT", defaults.conn_rate_limit),
            conn_rate_window: Duration::from_secs(env_parsed(
                "CONN_RATE_WINDOW_SECS",
                defaults.conn_rate_window.as_secs(),
            )),
            session_idle_timeout: Duration::from_secs(env_parsed(
                "SESSION_IDLE_TIMEOUT_SECS",
                defaults.session_idle_timeout.as_secs(),
            )),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: String) -> String {
    env_opt(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env_opt(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, fallback = %default, "unparseable env var, using default");
            default
        }),
    }
}

// =========================================================================
// Tests
// =========================================================================
