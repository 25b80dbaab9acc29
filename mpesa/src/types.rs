//! Daraja wire types

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// OAuth token response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token
    pub access_token: String,
    /// Lifetime in seconds (the provider sends it as a string)
    #[serde(deserialize_with = "string_or_number")]
    pub expires_in: String,
}

/// STK push request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    /// Paybill shortcode
    pub business_short_code: String,
    /// Signed password
    pub password: String,
    /// EAT timestamp used in the password
    pub timestamp: String,
    /// Always `CustomerPayBillOnline`
    pub transaction_type: &'static str,
    /// Whole units
    pub amount: u64,
    /// Paying phone
    pub party_a: String,
    /// Receiving shortcode
    pub party_b: String,
    /// Phone prompted for the PIN
    pub phone_number: String,
    /// Result callback
    #[serde(rename = "CallBackURL")]
    pub call_back_url: String,
    /// Reference shown to the payer (12 chars max)
    pub account_reference: String,
    /// Description (13 chars max)
    pub transaction_desc: String,
}

/// STK push acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StkPushResponse {
    /// Merchant request id
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    /// Checkout request id
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    /// `"0"` when accepted
    #[serde(rename = "ResponseCode", deserialize_with = "string_or_number")]
    pub response_code: String,
    /// Description of the response code
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    /// Message shown to the customer
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
}

/// STK query request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkQueryRequest {
    /// Paybill shortcode
    pub business_short_code: String,
    /// Signed password
    pub password: String,
    /// EAT timestamp used in the password
    pub timestamp: String,
    /// Push being queried
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

/// STK query result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StkQueryResponse {
    /// `"0"` when the query itself succeeded
    #[serde(rename = "ResponseCode", deserialize_with = "string_or_number")]
    pub response_code: String,
    /// Description of the response code
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    /// Payment result code, `"0"` when paid
    #[serde(rename = "ResultCode", deserialize_with = "string_or_number")]
    pub result_code: String,
    /// Payment result description
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
}

/// Error body returned with non-2xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Provider request id
    #[serde(rename = "requestId", default)]
    pub request_id: String,
    /// Error code, e.g. `500.001.1001` for a push still being processed
    #[serde(rename = "errorCode")]
    pub error_code: String,
    /// Human-readable message
    #[serde(rename = "errorMessage", default)]
    pub error_message: String,
}

/// Accept a code sent either as a JSON string or a number.
///
/// # Errors
///
/// Fails for any other JSON type.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_push_request_field_names() {
        let request = StkPushRequest {
            business_short_code: "174379".into(),
            password: "pw".into(),
            timestamp: "20240101000000".into(),
            transaction_type: "CustomerPayBillOnline",
            amount: 500,
            party_a: "254712345678".into(),
            party_b: "174379".into(),
            phone_number: "254712345678".into(),
            call_back_url: "https://example.com/cb".into(),
            account_reference: "Event-1".into(),
            transaction_desc: "Event Payment".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["BusinessShortCode"], "174379");
        assert_eq!(json["CallBackURL"], "https://example.com/cb");
        assert_eq!(json["PartyA"], "254712345678");
        assert_eq!(json["Amount"], 500);
    }

    #[test]
    fn test_query_response_accepts_numeric_codes() {
        let body = r#"{"ResponseCode":"0","ResponseDescription":"ok","ResultCode":1032,"ResultDesc":"Request cancelled by user"}"#;
        let response: StkQueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.result_code, "1032");
    }

    #[test]
    fn test_token_expiry_as_string() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":"3599"}"#).unwrap();
        assert_eq!(response.expires_in, "3599");
    }

    #[test]
    fn test_error_response_carries_request_id() {
        let body = r#"{"requestId":"16813-1590513-1","errorCode":"404.001.03","errorMessage":"Invalid Access Token"}"#;
        let error: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(error.request_id, "16813-1590513-1");
        assert_eq!(error.error_code, "404.001.03");

        let bare: ErrorResponse = serde_json::from_str(r#"{"errorCode":"500.001.1001"}"#).unwrap();
        assert!(bare.request_id.is_empty());
    }
}
