//! Payment result callback.
//!
//! - POST /events/mpesa/callback - Provider posts the STK push result
//!
//! The provider retries on anything but a 200, so the endpoint acknowledges
//! every body, including malformed ones and ones whose processing failed.
//! The poll sweep resolves whatever the callback could not.

use crate::metrics;
use crate::server::state::AppState;
use axum::{Json, body::Bytes, extract::State};
use rsvp_mpesa::parse_callback;
use serde::Serialize;

/// Acknowledgement body the provider expects.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CallbackAck {
    /// Always 0
    #[serde(rename = "ResultCode")]
    pub result_code: u8,
    /// Always `"Accepted"`
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

const ACCEPTED: CallbackAck = CallbackAck {
    result_code: 0,
    result_desc: "Accepted",
};

/// Receive a payment result.
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    let notice = match parse_callback(&body) {
        Ok(notice) => notice,
        Err(error) => {
            tracing::warn!(%error, bytes = body.len(), "Malformed payment callback ignored");
            metrics::record_callback("malformed");
            return Json(ACCEPTED);
        }
    };

    match state.reconciliation.handle_callback(&notice).await {
        Ok(outcome) => tracing::debug!(?outcome, "Payment callback handled"),
        Err(error) => tracing::error!(
            checkout_request_id = %notice.checkout_request_id,
            %error,
            "Payment callback failed, leaving it to the poll sweep"
        ),
    }
    Json(ACCEPTED)
}
