//! RSVP endpoints.
//!
//! - POST /events/:id/rsvp - Register the caller (starts payment for paid events)
//! - DELETE /events/:id/rsvp - Cancel the caller's registration

use super::error::ApiError;
use super::extractors::CurrentUser;
use crate::coordinator::Registration;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use rsvp_core::EventId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registration request body.
#[derive(Debug, Default, Deserialize)]
pub struct RsvpRequest {
    /// Phone number to charge; required for paid events
    #[serde(default)]
    pub phone: Option<String>,
}

/// Registration response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpResponse {
    /// Always `true`; failures use the error body
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Checkout request id of the STK push, for paid events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
}

/// Cancellation response body.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Always `true`
    pub success: bool,
}

/// Register for an event.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/events/550e8400-e29b-41d4-a716-446655440000/rsvp \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"phone": "0712345678"}'
/// ```
pub async fn register(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    body: Option<Json<RsvpRequest>>,
) -> Result<Json<RsvpResponse>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let registration = state
        .coordinator
        .register(EventId::from_uuid(event_id), user_id, request.phone.as_deref())
        .await?;

    let response = match registration {
        Registration::Confirmed => RsvpResponse {
            success: true,
            message: "You are registered for this event".to_string(),
            payment_reference: None,
        },
        Registration::PaymentPending {
            checkout_request_id,
            customer_message,
        } => RsvpResponse {
            success: true,
            message: customer_message.unwrap_or_else(|| {
                "Payment initiated, confirm the prompt on your phone".to_string()
            }),
            payment_reference: Some(checkout_request_id.as_str().to_string()),
        },
    };
    Ok(Json(response))
}

/// Cancel a registration.
///
/// # Example
///
/// ```bash
/// curl -X DELETE http://localhost:8080/events/550e8400-e29b-41d4-a716-446655440000/rsvp \
///   -H "Authorization: Bearer <token>"
/// ```
pub async fn cancel(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    state
        .coordinator
        .cancel(EventId::from_uuid(event_id), user_id)
        .await?;
    Ok(Json(CancelResponse { success: true }))
}
