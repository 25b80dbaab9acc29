//! Event endpoints.
//!
//! - POST /events - Publish an event (requires auth)
//! - GET /events/:id - Event details with live capacity

use super::error::ApiError;
use super::extractors::CurrentUser;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rsvp_core::{Event, EventId, Money};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to publish an event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    /// Event title
    pub title: String,
    /// Maximum number of attendees
    pub capacity: u32,
    /// Price in whole KES; 0 or absent for a free event
    #[serde(default)]
    pub price: u64,
    /// Price in cents; overrides `price` when present
    #[serde(default)]
    pub price_cents: Option<u64>,
}

/// Event details with live capacity.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    /// Event ID
    pub id: Uuid,
    /// Event title
    pub title: String,
    /// Maximum number of attendees
    pub capacity: u32,
    /// Price in cents
    pub price_cents: u64,
    /// Whether registration requires payment
    pub is_paid: bool,
    /// Pending and Paid attendees
    pub attendee_count: usize,
    /// Slots left
    pub remaining_spots: u32,
    /// No slots left
    pub is_full: bool,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl From<&Event> for EventResponse {
    fn from(event: &Event) -> Self {
        Self {
            id: *event.id.as_uuid(),
            title: event.title.clone(),
            capacity: event.capacity,
            price_cents: event.price.cents(),
            is_paid: event.is_paid(),
            attendee_count: event.live_count(),
            remaining_spots: event.remaining_spots(),
            is_full: event.is_full(),
            created_at: event.created_at,
        }
    }
}

/// Publish a new event.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/events \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"title": "Rust Nairobi Meetup", "capacity": 40, "price": 500}'
/// ```
pub async fn create_event(
    CurrentUser(organizer): CurrentUser,
    State(state): State<AppState>,
    Json(request): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::validation("title must not be empty"));
    }
    let price = match request.price_cents {
        Some(cents) => Money::from_cents(cents),
        None => Money::from_units(request.price),
    };

    let event = Event::new(title, request.capacity, price, state.clock.now());
    state.events.insert_event(&event).await?;

    tracing::info!(
        event_id = %event.id,
        organizer = %organizer,
        capacity = event.capacity,
        price = %event.price,
        "Event published"
    );
    Ok((StatusCode::CREATED, Json(EventResponse::from(&event))))
}

/// Get event details by ID.
///
/// Public endpoint - no authentication required.
pub async fn get_event(
    Path(event_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<EventResponse>, ApiError> {
    let event = state
        .events
        .find_event(EventId::from_uuid(event_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event", event_id))?;
    Ok(Json(EventResponse::from(&event)))
}
