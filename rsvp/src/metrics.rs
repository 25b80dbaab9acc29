//! Business metrics for the RSVP service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `rsvp_registrations_total{outcome}` - Registration attempts by outcome
//! - `rsvp_payments_total{status}` - Payments reaching a terminal status
//! - `rsvp_callbacks_total{result}` - Provider callbacks by handling result
//! - `rsvp_sessions_expired_total` - Sessions force-failed at the hard deadline
//! - `rsvp_orphans_released_total` - Unreferenced reservations released
//! - `rsvp_projection_write_failures_total` - Projection writes queued for repair
//! - `rsvp_projection_repairs_total` - Projection entries or users repaired
//!
//! ## Gauges
//! - `rsvp_repair_queue_depth` - Pairs waiting for a projection retry
//!
//! ## Histograms
//! - `rsvp_payment_resolution_seconds` - Time from STK push to terminal status

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Metrics exporter errors.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Invalid exporter configuration
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the global recorder
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and describe every metric.
///
/// The returned handle renders the scrape body served at `GET /metrics`.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("rsvp_payment_resolution_seconds".to_string()),
            &[5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_business_metrics();
    Ok(handle)
}

/// Register all metric descriptions.
///
/// Call once at startup, after installing the recorder.
pub fn register_business_metrics() {
    describe_counter!(
        "rsvp_registrations_total",
        "Registration attempts by outcome (confirmed, payment_pending, duplicate, capacity_exceeded, invalid, not_found, payment_failed, error)"
    );
    describe_counter!(
        "rsvp_payments_total",
        "Payments reaching a terminal status (paid, failed, expired)"
    );
    describe_counter!(
        "rsvp_callbacks_total",
        "Provider callbacks by handling result (applied, noop, unknown, malformed, error)"
    );
    describe_counter!(
        "rsvp_sessions_expired_total",
        "Payment sessions force-failed after the hard deadline"
    );
    describe_counter!(
        "rsvp_orphans_released_total",
        "Pending reservations without a payment reference released by the sweep"
    );
    describe_counter!(
        "rsvp_projection_write_failures_total",
        "User projection writes that failed and were queued for repair"
    );
    describe_counter!(
        "rsvp_projection_repairs_total",
        "User projection entries re-derived from the event ledger"
    );
    describe_gauge!(
        "rsvp_repair_queue_depth",
        "Event/user pairs waiting for a projection retry"
    );
    describe_histogram!(
        "rsvp_payment_resolution_seconds",
        "Time from STK push to terminal payment status"
    );

    tracing::info!("Business metrics registered");
}

/// Record a registration attempt.
pub fn record_registration(outcome: &'static str) {
    metrics::counter!("rsvp_registrations_total", "outcome" => outcome).increment(1);
}

/// Record a payment reaching a terminal status.
pub fn record_payment(status: &'static str, resolution_secs: f64) {
    metrics::counter!("rsvp_payments_total", "status" => status).increment(1);
    metrics::histogram!("rsvp_payment_resolution_seconds").record(resolution_secs);
}

/// Record a provider callback.
pub fn record_callback(result: &'static str) {
    metrics::counter!("rsvp_callbacks_total", "result" => result).increment(1);
}

/// Record a session expired at the hard deadline.
pub fn record_session_expired() {
    metrics::counter!("rsvp_sessions_expired_total").increment(1);
}

/// Record an orphaned reservation released.
pub fn record_orphan_released() {
    metrics::counter!("rsvp_orphans_released_total").increment(1);
}

/// Record a projection write that was queued for repair.
pub fn record_projection_write_failure() {
    metrics::counter!("rsvp_projection_write_failures_total").increment(1);
}

/// Record repaired projection entries.
pub fn record_projection_repairs(count: usize) {
    metrics::counter!("rsvp_projection_repairs_total").increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record the current repair queue depth.
#[allow(clippy::cast_precision_loss)] // Queue depth is small
pub fn record_repair_queue_depth(depth: usize) {
    metrics::gauge!("rsvp_repair_queue_depth").set(depth as f64);
}
