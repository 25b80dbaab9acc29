//! Payment gateway collaborator.
//!
//! The coordinator and the reconciliation engine talk to the mobile-money
//! provider only through [`PaymentGateway`]; the concrete HTTP client lives in
//! its own crate.

use crate::types::{CheckoutRequestId, MerchantRequestId, PaymentOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An STK push to initiate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Phone number to charge, any accepted local or international form
    pub phone: String,
    /// Amount in whole units (already rounded up)
    pub amount: u64,
    /// Reference shown to the payer
    pub account_reference: String,
    /// Free-text description
    pub description: String,
}

/// Provider acknowledgement of an STK push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiation {
    /// Correlation id for the eventual result
    pub checkout_request_id: CheckoutRequestId,
    /// Merchant-side id
    pub merchant_request_id: MerchantRequestId,
    /// Message the provider shows the customer
    pub customer_message: Option<String>,
}

/// Result of an STK status query.
///
/// A request the provider is still processing is reported as
/// [`GatewayError::Rejected`], not as a report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Provider result code, `"0"` on success
    pub result_code: String,
    /// Provider description
    pub result_desc: String,
}

impl StatusReport {
    /// Interpret the report as a final payment outcome
    #[must_use]
    pub fn outcome(&self) -> PaymentOutcome {
        PaymentOutcome::from_result_code(&self.result_code, &self.result_desc)
    }
}

/// Payment gateway failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Request rejected locally before any call (phone, amount)
    #[error("invalid payment request: {0}")]
    Validation(String),

    /// Token request failed or was refused
    #[error("gateway authentication failed: {0}")]
    Auth(String),

    /// Transport failure or timeout
    #[error("gateway unreachable: {0}")]
    Network(String),

    /// The provider answered with an error
    #[error("gateway rejected request ({code}): {description}")]
    Rejected {
        /// Provider error code or HTTP status
        code: String,
        /// Provider description
        description: String,
    },
}

impl GatewayError {
    /// Whether retrying the same call could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Auth(_))
    }
}

/// Mobile-money payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Initiate an STK push.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on validation, authentication, transport or
    /// provider failure. On error no payment was started.
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError>;

    /// Query the status of an earlier STK push.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the query fails or the provider has no
    /// final result yet.
    async fn query_status(&self, checkout_request_id: &CheckoutRequestId) -> Result<StatusReport, GatewayError>;
}
