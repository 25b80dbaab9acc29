//! Error types for the Daraja client

use thiserror::Error;

/// Errors that can occur when interacting with the Daraja API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MpesaError {
    /// Phone number cannot be normalised to `254` followed by 9 digits
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// Amount must be at least one whole unit
    #[error("invalid amount: {0}")]
    InvalidAmount(u64),

    /// Client misconfigured (e.g. missing callback URL)
    #[error("invalid configuration: {0}")]
    Config(String),

    /// OAuth token request failed or was refused
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// HTTP request failed
    #[error("request failed: {0}")]
    Network(String),

    /// Provider returned an error
    #[error("rejected ({code}): {description}")]
    Rejected {
        /// Provider response or error code
        code: String,
        /// Provider description
        description: String,
    },

    /// Response parsing failed
    #[error("response parsing failed: {0}")]
    ResponseParse(String),
}

impl From<reqwest::Error> for MpesaError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::ResponseParse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}
