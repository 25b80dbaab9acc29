//! Daraja API client implementation

use crate::config::MpesaConfig;
use crate::error::MpesaError;
use crate::phone::normalize_phone;
use crate::signing::{password, timestamp};
use crate::types::{
    ErrorResponse, StkPushRequest, StkPushResponse, StkQueryRequest, StkQueryResponse,
    TokenResponse,
};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use rsvp_core::{Clock, SystemClock};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Refresh tokens this long before the provider says they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the provider sends an unparseable `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3599;

/// Provider limit on `AccountReference`
const ACCOUNT_REFERENCE_MAX: usize = 12;

/// Provider limit on `TransactionDesc`
const TRANSACTION_DESC_MAX: usize = 13;

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

/// Cached OAuth bearer token.
#[derive(Clone, Debug)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Bearer value
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the cached token stops being used (already net of the margin)
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

struct Inner {
    http: Client,
    config: MpesaConfig,
    clock: Arc<dyn Clock>,
    // Held across a refresh so concurrent callers share one token request.
    token: Mutex<Option<AccessToken>>,
}

/// Daraja API client.
///
/// Cheap to clone; all clones share one HTTP connection pool and one token
/// cache.
#[derive(Clone)]
pub struct MpesaClient {
    inner: Arc<Inner>,
}

impl MpesaClient {
    /// Create a client using the system clock
    ///
    /// # Errors
    ///
    /// Returns [`MpesaError::Config`] if the HTTP client cannot be built.
    pub fn new(config: MpesaConfig) -> Result<Self, MpesaError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a client with an injected clock
    ///
    /// # Errors
    ///
    /// Returns [`MpesaError::Config`] if the HTTP client cannot be built.
    pub fn with_clock(config: MpesaConfig, clock: Arc<dyn Clock>) -> Result<Self, MpesaError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MpesaError::Config(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                clock,
                token: Mutex::new(None),
            }),
        })
    }

    /// Client configuration
    #[must_use]
    pub fn config(&self) -> &MpesaConfig {
        &self.inner.config
    }

    /// Current bearer token, fetching a new one if the cache is empty or
    /// about to expire.
    ///
    /// # Errors
    ///
    /// Returns [`MpesaError::Auth`] if the provider refuses the credentials,
    /// or a transport error.
    pub async fn access_token(&self) -> Result<AccessToken, MpesaError> {
        let mut cached = self.inner.token.lock().await;
        let now = self.inner.clock.now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh_at(now)) {
            return Ok(token.clone());
        }

        let token = self.fetch_token(now).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn fetch_token(&self, now: DateTime<Utc>) -> Result<AccessToken, MpesaError> {
        let config = &self.inner.config;
        tracing::debug!("Requesting Daraja access token");

        let response = self
            .inner
            .http
            .get(format!("{}/oauth/v1/generate", config.base_url))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&config.consumer_key, Some(&config.consumer_secret))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "Token request refused");
            return Err(MpesaError::Auth(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| MpesaError::ResponseParse(e.to_string()))?;

        let lifetime = body
            .expires_in
            .trim()
            .parse::<i64>()
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(AccessToken {
            value: body.access_token,
            expires_at: now + Duration::seconds(lifetime - EXPIRY_MARGIN_SECS),
        })
    }

    async fn invalidate_token(&self) {
        *self.inner.token.lock().await = None;
    }

    /// Initiate an STK push.
    ///
    /// `amount` is in whole units. `account_reference` is truncated to the
    /// provider's 12-character limit.
    ///
    /// # Errors
    ///
    /// Returns [`MpesaError::InvalidPhone`] or [`MpesaError::InvalidAmount`]
    /// before any network call, [`MpesaError::Rejected`] when the provider
    /// answers with a non-zero `ResponseCode`, or a transport error.
    #[tracing::instrument(skip(self, phone), name = "mpesa_stk_push")]
    pub async fn initiate_payment(
        &self,
        phone: &str,
        amount: u64,
        account_reference: &str,
    ) -> Result<StkPushResponse, MpesaError> {
        self.initiate_payment_with_desc(phone, amount, account_reference, "Event Payment")
            .await
    }

    /// Initiate an STK push with a custom transaction description.
    ///
    /// # Errors
    ///
    /// Same as [`MpesaClient::initiate_payment`].
    pub async fn initiate_payment_with_desc(
        &self,
        phone: &str,
        amount: u64,
        account_reference: &str,
        description: &str,
    ) -> Result<StkPushResponse, MpesaError> {
        let phone = normalize_phone(phone)?;
        if amount == 0 {
            return Err(MpesaError::InvalidAmount(amount));
        }

        let config = &self.inner.config;
        if config.callback_url.is_empty() {
            return Err(MpesaError::Config("callback URL not set".to_string()));
        }

        let token = self.access_token().await?;
        let timestamp = timestamp(self.inner.clock.now());

        let request = StkPushRequest {
            business_short_code: config.shortcode.clone(),
            password: password(&config.shortcode, &config.passkey, &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE,
            amount,
            party_a: phone.clone(),
            party_b: config.shortcode.clone(),
            phone_number: phone,
            call_back_url: config.callback_url.clone(),
            account_reference: account_reference.chars().take(ACCOUNT_REFERENCE_MAX).collect(),
            transaction_desc: description.chars().take(TRANSACTION_DESC_MAX).collect(),
        };

        let response = self
            .inner
            .http
            .post(format!("{}/mpesa/stkpush/v1/processrequest", config.base_url))
            .bearer_auth(token.value())
            .json(&request)
            .send()
            .await?;

        let push: StkPushResponse = self.read_json(response).await?;
        if push.response_code != "0" {
            return Err(MpesaError::Rejected {
                code: push.response_code,
                description: push.response_description,
            });
        }

        tracing::info!(
            checkout_request_id = %push.checkout_request_id,
            merchant_request_id = %push.merchant_request_id,
            "STK push accepted"
        );
        Ok(push)
    }

    /// Query the result of an earlier STK push.
    ///
    /// # Errors
    ///
    /// Returns [`MpesaError::Rejected`] while the provider is still
    /// processing the push (error code `500.001.1001`) or for any other
    /// provider error, or a transport error.
    #[tracing::instrument(skip(self), name = "mpesa_stk_query")]
    pub async fn query_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse, MpesaError> {
        let config = &self.inner.config;
        let token = self.access_token().await?;
        let timestamp = timestamp(self.inner.clock.now());

        let request = StkQueryRequest {
            business_short_code: config.shortcode.clone(),
            password: password(&config.shortcode, &config.passkey, &timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .inner
            .http
            .post(format!("{}/mpesa/stkpushquery/v1/query", config.base_url))
            .bearer_auth(token.value())
            .json(&request)
            .send()
            .await?;

        let query: StkQueryResponse = self.read_json(response).await?;
        tracing::debug!(
            result_code = %query.result_code,
            result_desc = %query.result_desc,
            "STK query answered"
        );
        Ok(query)
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response) -> Result<T, MpesaError> {
        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| MpesaError::ResponseParse(e.to_string())),
            StatusCode::UNAUTHORIZED => {
                self.invalidate_token().await;
                Err(MpesaError::Auth("access token rejected".to_string()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(match serde_json::from_str::<ErrorResponse>(&body) {
                    Ok(error) => {
                        tracing::debug!(
                            status = status.as_u16(),
                            request_id = %error.request_id,
                            error_code = %error.error_code,
                            "Provider returned an error"
                        );
                        MpesaError::Rejected {
                            code: error.error_code,
                            description: error.error_message,
                        }
                    }
                    Err(_) => MpesaError::Rejected {
                        code: status.as_u16().to_string(),
                        description: body,
                    },
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = MpesaClient::new(MpesaConfig::sandbox("k", "s", "p", "174379")).unwrap();
        assert_eq!(client.config().base_url, crate::config::SANDBOX_URL);
    }

    #[tokio::test]
    async fn test_invalid_phone_fails_before_network() {
        let config = MpesaConfig::sandbox("k", "s", "p", "174379")
            .with_base_url("http://127.0.0.1:9")
            .with_callback_url("http://localhost/cb");
        let client = MpesaClient::new(config).unwrap();

        let result = client.initiate_payment("12345", 100, "Event-1").await;
        assert!(matches!(result, Err(MpesaError::InvalidPhone(_))));

        let result = client.initiate_payment("0712345678", 0, "Event-1").await;
        assert!(matches!(result, Err(MpesaError::InvalidAmount(0))));
    }

    #[test]
    fn test_token_freshness() {
        let now = Utc::now();
        let token = AccessToken {
            value: "t".into(),
            expires_at: now + Duration::seconds(10),
        };
        assert!(token.is_fresh_at(now));
        assert!(!token.is_fresh_at(now + Duration::seconds(10)));
    }
}
