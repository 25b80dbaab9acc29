//! Client configuration

use std::time::Duration;

/// Daraja sandbox base URL
pub const SANDBOX_URL: &str = "https://sandbox.safaricom.co.ke";

/// Daraja production base URL
pub const PRODUCTION_URL: &str = "https://api.safaricom.co.ke";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and endpoints for one paybill shortcode.
#[derive(Clone)]
pub struct MpesaConfig {
    /// OAuth consumer key
    pub consumer_key: String,
    /// OAuth consumer secret
    pub consumer_secret: String,
    /// Lipa na M-Pesa passkey
    pub passkey: String,
    /// Business shortcode (paybill)
    pub shortcode: String,
    /// API base URL without trailing slash
    pub base_url: String,
    /// Where the provider posts payment results
    pub callback_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl MpesaConfig {
    /// Configuration against the sandbox with the default timeout
    #[must_use]
    pub fn sandbox(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        passkey: impl Into<String>,
        shortcode: impl Into<String>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            passkey: passkey.into(),
            shortcode: shortcode.into(),
            base_url: SANDBOX_URL.to_string(),
            callback_url: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the result callback URL
    #[must_use]
    pub fn with_callback_url(mut self, callback_url: impl Into<String>) -> Self {
        self.callback_url = callback_url.into();
        self
    }

    /// Override the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("shortcode", &self.shortcode)
            .field("base_url", &self.base_url)
            .field("callback_url", &self.callback_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_secrets() {
        let config = MpesaConfig::sandbox("key", "very-secret", "passkey", "174379");
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("passkey\""));
        assert!(debug.contains("174379"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = MpesaConfig::sandbox("k", "s", "p", "1").with_base_url("http://localhost:9000/");
        assert_eq!(config.base_url, "http://localhost:9000");
    }
}
