//! Application state for the RSVP HTTP server.

use crate::coordinator::RegistrationCoordinator;
use crate::reconciliation::ReconciliationEngine;
use axum::extract::FromRef;
use metrics_exporter_prometheus::PrometheusHandle;
use rsvp_core::{Clock, EventStore, IdentityProvider, UserProjectionStore};
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via Arc) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Registration and cancellation
    pub coordinator: Arc<RegistrationCoordinator>,
    /// Payment result handling
    pub reconciliation: Arc<ReconciliationEngine>,
    /// Authoritative event ledger (event reads, publishing, readiness)
    pub events: Arc<dyn EventStore>,
    /// Per-user projection (read side)
    pub projections: Arc<dyn UserProjectionStore>,
    /// Bearer token resolution
    pub identity: Arc<dyn IdentityProvider>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Prometheus scrape handle, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

// Lets the CurrentUser extractor reach the identity provider
impl FromRef<AppState> for Arc<dyn IdentityProvider> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.identity.clone()
    }
}
