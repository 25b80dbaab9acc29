//! User endpoints.
//!
//! - GET /users/me/events - The caller's registrations

use super::error::ApiError;
use super::extractors::CurrentUser;
use crate::server::state::AppState;
use axum::{Json, extract::State};
use rsvp_core::AttendanceRef;
use serde::Serialize;
use uuid::Uuid;

/// The caller's registrations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyEventsResponse {
    /// Caller
    pub user_id: Uuid,
    /// One entry per event
    pub attending: Vec<AttendanceRef>,
}

/// List the caller's registrations from their projection.
pub async fn my_events(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<MyEventsResponse>, ApiError> {
    let attending = state
        .projections
        .find(user_id)
        .await?
        .map(|projection| projection.attending)
        .unwrap_or_default();

    Ok(Json(MyEventsResponse {
        user_id: *user_id.as_uuid(),
        attending,
    }))
}
