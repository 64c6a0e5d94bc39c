//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use passkey_core::captcha::{RecaptchaClientConfig, DEFAULT_SCORE_THRESHOLD, DEFAULT_VERIFY_URL};
use passkey_core::{CaptchaConfig, ChallengeStoreConfig, RelyingParty};

/// Upper bound applied to `CHALLENGE_TTL_SECS` (one day)
pub const MAX_CHALLENGE_TTL_SECS: u64 = 86_400;

/// Server configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in KB (default: 64)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// PostgreSQL URL; in-memory registry when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Relying party id, the effective domain (default: localhost)
    pub rp_id: String,
    /// Relying party origin (default: http://localhost:3000)
    pub rp_origin: String,
    /// Relying party display name
    pub rp_name: String,
    /// Client-side ceremony timeout advertised in options (default: 60000)
    pub ceremony_timeout_ms: u64,
    /// Challenge lifetime in seconds (default: 300)
    pub challenge_ttl_secs: u64,
    /// Maximum number of pending challenges (default: 100000)
    pub challenge_capacity: usize,
    /// Interval between expired-challenge sweeps in seconds (default: 60)
    pub challenge_sweep_secs: u64,
    /// Enable CAPTCHA gating of ceremony start (default: false for tests)
    pub recaptcha_enabled: bool,
    /// Site-verify endpoint
    pub recaptcha_verify_url: String,
    pub recaptcha_v3_secret: Option<String>,
    pub recaptcha_v2_secret: Option<String>,
    /// Minimum v3 score, inclusive (default: 0.5)
    pub recaptcha_v3_threshold: f64,
    /// Site-verify request timeout in seconds (default: 5)
    pub recaptcha_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_kb: 64,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            database_url: None,
            database_max_connections: 20,
            rp_id: "localhost".to_string(),
            rp_origin: "http://localhost:3000".to_string(),
            rp_name: "Passkey Demo".to_string(),
            ceremony_timeout_ms: 60_000,
            challenge_ttl_secs: 300,
            challenge_capacity: 100_000,
            challenge_sweep_secs: 60,
            recaptcha_enabled: false,
            recaptcha_verify_url: DEFAULT_VERIFY_URL.to_string(),
            recaptcha_v3_secret: None,
            recaptcha_v2_secret: None,
            recaptcha_v3_threshold: DEFAULT_SCORE_THRESHOLD,
            recaptcha_timeout_secs: 5,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let recaptcha_enabled = std::env::var("RECAPTCHA_ENABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            port: env_parse("PORT", defaults.port),
            host,
            allowed_origins,
            body_limit_kb: env_parse("BODY_LIMIT_KB", defaults.body_limit_kb),
            timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_parse("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            database_url: env_string("DATABASE_URL"),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            rp_id: env_string("WEBAUTHN_RP_ID").unwrap_or(defaults.rp_id),
            rp_origin: env_string("WEBAUTHN_RP_ORIGIN").unwrap_or(defaults.rp_origin),
            rp_name: env_string("WEBAUTHN_RP_NAME").unwrap_or(defaults.rp_name),
            ceremony_timeout_ms: env_parse("CEREMONY_TIMEOUT_MS", defaults.ceremony_timeout_ms),
            challenge_ttl_secs: env_parse("CHALLENGE_TTL_SECS", defaults.challenge_ttl_secs),
            challenge_capacity: env_parse("CHALLENGE_CAPACITY", defaults.challenge_capacity),
            challenge_sweep_secs: env_parse("CHALLENGE_SWEEP_SECS", defaults.challenge_sweep_secs),
            recaptcha_enabled,
            recaptcha_verify_url: env_string("RECAPTCHA_VERIFY_URL")
                .unwrap_or(defaults.recaptcha_verify_url),
            recaptcha_v3_secret: env_string("RECAPTCHA_V3_SECRET"),
            recaptcha_v2_secret: env_string("RECAPTCHA_V2_SECRET"),
            recaptcha_v3_threshold: env_parse(
                "RECAPTCHA_V3_THRESHOLD",
                defaults.recaptcha_v3_threshold,
            ),
            recaptcha_timeout_secs: env_parse(
                "RECAPTCHA_TIMEOUT_SECS",
                defaults.recaptcha_timeout_secs,
            ),
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    /// Validated relying-party settings
    pub fn relying_party(&self) -> passkey_core::Result<RelyingParty> {
        RelyingParty::new(&self.rp_id, &self.rp_name, &self.rp_origin)
    }

    pub fn challenge_store_config(&self) -> ChallengeStoreConfig {
        ChallengeStoreConfig {
            ttl: Duration::from_secs(self.challenge_ttl_secs.min(MAX_CHALLENGE_TTL_SECS)),
            capacity: self.challenge_capacity,
        }
    }

    pub fn captcha_config(&self) -> CaptchaConfig {
        CaptchaConfig {
            enabled: self.recaptcha_enabled,
            v3_secret: self.recaptcha_v3_secret.clone(),
            v2_secret: self.recaptcha_v2_secret.clone(),
            score_threshold: self.recaptcha_v3_threshold,
        }
    }

    pub fn recaptcha_client_config(&self) -> RecaptchaClientConfig {
        RecaptchaClientConfig {
            verify_url: self.recaptcha_verify_url.clone(),
            timeout: Duration::from_secs(self.recaptcha_timeout_secs),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Config")
            .field("socket_addr", &self.socket_addr())
            .field("allowed_origins", &self.allowed_origins)
            .field("body_limit_kb", &self.body_limit_kb)
            .field("timeout_secs", &self.timeout_secs)
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("database_url", &redact(&self.database_url))
            .field("rp_id", &self.rp_id)
            .field("rp_origin", &self.rp_origin)
            .field("challenge_ttl_secs", &self.challenge_ttl_secs)
            .field("challenge_capacity", &self.challenge_capacity)
            .field("recaptcha_enabled", &self.recaptcha_enabled)
            .field("recaptcha_v3_secret", &redact(&self.recaptcha_v3_secret))
            .field("recaptcha_v2_secret", &redact(&self.recaptcha_v2_secret))
            .field("recaptcha_v3_threshold", &self.recaptcha_v3_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(!config.rate_limit_enabled);
        assert!(!config.recaptcha_enabled);
        assert_eq!(config.ceremony_timeout_ms, 60_000);
        assert_eq!(config.recaptcha_v3_threshold, 0.5);
    }

    #[test]
    fn test_default_relying_party_is_valid() {
        let rp = Config::default().relying_party().unwrap();
        assert_eq!(rp.id, "localhost");
        assert_eq!(rp.origin, "http://localhost:3000");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config {
            database_url: Some("postgres://user:hunter2@db/passkeys".into()),
            recaptcha_v3_secret: Some("v3-secret-value".into()),
            ..Config::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("v3-secret-value"));
    }

    #[test]
    fn test_challenge_store_config() {
        let config = Config {
            challenge_ttl_secs: 10,
            challenge_capacity: 5,
            ..Config::default()
        };
        let store = config.challenge_store_config();
        assert_eq!(store.ttl, Duration::from_secs(10));
        assert_eq!(store.capacity, 5);
    }

    #[test]
    fn test_challenge_ttl_is_clamped() {
        let config = Config {
            challenge_ttl_secs: u64::MAX,
            ..Config::default()
        };
        assert_eq!(
            config.challenge_store_config().ttl,
            Duration::from_secs(MAX_CHALLENGE_TTL_SECS)
        );
    }
}
