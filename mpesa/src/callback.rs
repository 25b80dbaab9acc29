//! STK result callback parsing.
//!
//! The provider posts `{"Body":{"stkCallback":{…}}}`; some relays flatten it to
//! the inner object. Both are accepted, with `ResultCode` as a string or
//! a number.

use crate::error::MpesaError;
use crate::types::string_or_number;
use rsvp_core::{CheckoutRequestId, PaymentOutcome};
use serde::Deserialize;
use serde_json::Value;

/// A parsed payment result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackNotice {
    /// Push the result belongs to
    pub checkout_request_id: CheckoutRequestId,
    /// Merchant request id, when present
    pub merchant_request_id: Option<String>,
    /// Result code, `"0"` when paid
    pub result_code: String,
    /// Result description
    pub result_desc: String,
    /// M-Pesa receipt number on success
    pub receipt_number: Option<String>,
}

impl CallbackNotice {
    /// Final payment outcome carried by the callback
    #[must_use]
    pub fn outcome(&self) -> PaymentOutcome {
        PaymentOutcome::from_result_code(&self.result_code, &self.result_desc)
    }
}

#[derive(Deserialize)]
struct RawCallback {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode", deserialize_with = "string_or_number")]
    result_code: String,
    #[serde(rename = "ResultDesc", default)]
    result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    metadata: Option<RawMetadata>,
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(rename = "Item", default)]
    items: Vec<RawItem>,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

/// Parse a callback body.
///
/// # Errors
///
/// Returns [`MpesaError::ResponseParse`] for malformed JSON or a body without
/// `CheckoutRequestID`/`ResultCode`.
pub fn parse_callback(body: &[u8]) -> Result<CallbackNotice, MpesaError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| MpesaError::ResponseParse(e.to_string()))?;

    let inner = value
        .pointer("/Body/stkCallback")
        .cloned()
        .unwrap_or(value);

    let raw: RawCallback =
        serde_json::from_value(inner).map_err(|e| MpesaError::ResponseParse(e.to_string()))?;

    if raw.checkout_request_id.trim().is_empty() {
        return Err(MpesaError::ResponseParse("empty CheckoutRequestID".to_string()));
    }

    let receipt_number = raw.metadata.and_then(|m| {
        m.items
            .into_iter()
            .find(|item| item.name == "MpesaReceiptNumber")
            .and_then(|item| item.value)
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
    });

    Ok(CallbackNotice {
        checkout_request_id: CheckoutRequestId::new(raw.checkout_request_id),
        merchant_request_id: raw.merchant_request_id,
        result_code: raw.result_code,
        result_desc: raw.result_desc,
        receipt_number,
    })
}
