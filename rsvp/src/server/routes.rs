//! Router configuration for the RSVP service.

use super::health::{health_check, metrics, readiness_check};
use super::state::AppState;
use crate::api::{callback, events, rsvp, users};
use crate::config::CALLBACK_PATH;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - Health, readiness and metrics (no authentication)
/// - Event publishing and details
/// - RSVP registration and cancellation
/// - The caller's registrations
/// - The payment result callback (no authentication; the provider calls it)
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route("/events", post(events::create_event))
        .route("/events/:id", get(events::get_event))
        .route("/events/:id/rsvp", post(rsvp::register).delete(rsvp::cancel))
        .route(CALLBACK_PATH, post(callback::mpesa_callback))
        .route("/users/me/events", get(users::my_events))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
