//! Configuration management for the RSVP service.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::Duration as ChronoDuration;
use rsvp_mpesa::MpesaConfig;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Path the provider posts payment results to
pub const CALLBACK_PATH: &str = "/events/mpesa/callback";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// M-Pesa Daraja configuration
    pub mpesa: MpesaSettings,
    /// Background reconciliation configuration
    pub reconciliation: ReconciliationConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL; in-memory stores when absent
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// M-Pesa Daraja configuration
#[derive(Clone)]
pub struct MpesaSettings {
    /// OAuth consumer key
    pub consumer_key: String,
    /// OAuth consumer secret
    pub consumer_secret: String,
    /// Lipa na M-Pesa passkey
    pub passkey: String,
    /// Business shortcode
    pub shortcode: String,
    /// Daraja base URL (default: sandbox)
    pub base_url: String,
    /// Public base URL of this service, used to build the callback URL
    pub public_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Background reconciliation configuration
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Seconds between poll sweeps
    pub poll_interval: u64,
    /// Age in seconds at which an unresolved payment is queried
    pub query_after: u64,
    /// Age in seconds at which an unresolved payment is expired
    pub hard_deadline: u64,
    /// Seconds between projection repair sweeps
    pub repair_interval: u64,
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// `token:user-uuid` pairs, comma-separated
    pub tokens: String,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed(&lookup, "PORT").unwrap_or(8080),
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT").unwrap_or(30),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
                max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS").unwrap_or(10),
            },
            mpesa: MpesaSettings {
                consumer_key: lookup("MPESA_CONSUMER_KEY").unwrap_or_default(),
                consumer_secret: lookup("MPESA_CONSUMER_SECRET").unwrap_or_default(),
                passkey: lookup("MPESA_PASSKEY").unwrap_or_default(),
                shortcode: lookup("MPESA_SHORTCODE").unwrap_or_else(|| "174379".to_string()),
                base_url: lookup("MPESA_BASE_URL")
                    .unwrap_or_else(|| rsvp_mpesa::config::SANDBOX_URL.to_string()),
                public_url: lookup("BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string()),
                timeout_secs: parsed(&lookup, "MPESA_TIMEOUT_SECS").unwrap_or(30),
            },
            reconciliation: ReconciliationConfig {
                poll_interval: parsed(&lookup, "POLL_INTERVAL_SECS").unwrap_or(60),
                query_after: parsed(&lookup, "QUERY_AFTER_SECS").unwrap_or(300),
                hard_deadline: parsed(&lookup, "HARD_DEADLINE_SECS").unwrap_or(900),
                repair_interval: parsed(&lookup, "REPAIR_INTERVAL_SECS").unwrap_or(60),
            },
            auth: AuthConfig {
                tokens: lookup("AUTH_TOKENS").unwrap_or_default(),
            },
        }
    }

    /// Socket address string to bind
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl MpesaSettings {
    /// Whether consumer key, secret and passkey are all set
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.consumer_key.is_empty() && !self.consumer_secret.is_empty() && !self.passkey.is_empty()
    }

    /// URL the provider should post results to
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}{CALLBACK_PATH}", self.public_url.trim_end_matches('/'))
    }

    /// Client configuration for [`rsvp_mpesa::MpesaClient`]
    #[must_use]
    pub fn client_config(&self) -> MpesaConfig {
        MpesaConfig::sandbox(
            self.consumer_key.clone(),
            self.consumer_secret.clone(),
            self.passkey.clone(),
            self.shortcode.clone(),
        )
        .with_base_url(self.base_url.clone())
        .with_callback_url(self.callback_url())
        .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

impl ReconciliationConfig {
    /// Poll sweep period, at least one second
    #[must_use]
    pub const fn poll_every(&self) -> Duration {
        period(self.poll_interval)
    }

    /// Projection repair period, at least one second
    #[must_use]
    pub const fn repair_every(&self) -> Duration {
        period(self.repair_interval)
    }

    /// Query and expiry windows for the reconciliation engine
    #[must_use]
    pub fn windows(&self) -> (ChronoDuration, ChronoDuration) {
        (seconds(self.query_after), seconds(self.hard_deadline))
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

const fn period(secs: u64) -> Duration {
    if secs == 0 { Duration::from_secs(1) } else { Duration::from_secs(secs) }
}

fn seconds(secs: u64) -> ChronoDuration {
    i64::try_from(secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .unwrap_or(ChronoDuration::MAX)
}

impl fmt::Debug for MpesaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpesaSettings")
            .field("consumer_key", &"<redacted>")
            .field("consumer_secret", &"<redacted>")
            .field("passkey", &"<redacted>")
            .field("shortcode", &self.shortcode)
            .field("base_url", &self.base_url)
            .field("public_url", &self.public_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("tokens", &"<redacted>")
            .finish()
    }
}
