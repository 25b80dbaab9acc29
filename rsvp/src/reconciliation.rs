//! Payment reconciliation.
//!
//! A pending payment reaches a terminal status through whichever trigger
//! delivers a result first:
//!
//! - the provider callback ([`ReconciliationEngine::handle_callback`]), which
//!   may arrive any number of times, late, or never
//! - the poll sweep ([`ReconciliationEngine::sweep`]), which queries sessions
//!   older than `query_after` and expires those past `hard_deadline`
//!
//! Both end in a compare-and-swap on the attendance carrying the checkout id,
//! so racing triggers apply exactly one transition. The orphan sweep
//! ([`ReconciliationEngine::release_orphans`]) frees reservations that never
//! got as far as a payment reference and settles referenced ones that no
//! open session will ever resolve.
//!
//! Notices are sent from a spawned task; a slow notifier never delays a
//! transition or the callback acknowledgement.

use crate::consistency::{ProjectionChange, ProjectionSync};
use crate::metrics;
use chrono::{DateTime, Duration, Utc};
use rsvp_core::{
    CheckoutRequestId, Clock, EventId, EventStore, Notifier, PaymentGateway, PaymentNotice,
    PaymentOutcome, PaymentSession, PaymentSessionStore, PaymentStatus, ReleaseOutcome,
    SessionOutcome, StoreError, TransitionOutcome, UserId,
};
use rsvp_mpesa::CallbackNotice;
use std::sync::Arc;
use tracing::Instrument;

/// Default age at which an unresolved session is queried
pub const DEFAULT_QUERY_AFTER: Duration = Duration::minutes(5);

/// Default age at which an unresolved session is expired
pub const DEFAULT_HARD_DEADLINE: Duration = Duration::minutes(15);

/// Result of applying one payment result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The attendance moved from Pending to this status
    Applied(PaymentStatus),
    /// The attendance was already terminal; nothing changed
    Noop(PaymentStatus),
    /// The session exists but no attendance carries its reference
    /// (cancelled during payment); the session was closed
    Detached,
    /// The registration has not recorded this reference yet; the session
    /// stays open and the sweep applies the result later
    Deferred,
    /// Neither a session nor an attendance knows this checkout id
    UnknownSession,
}

/// Result of one [`ReconciliationEngine::sweep`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions queried
    pub checked: usize,
    /// Sessions closed with a provider result
    pub resolved: usize,
    /// Sessions force-failed at the hard deadline
    pub expired: usize,
    /// Sessions left open for the next sweep
    pub still_pending: usize,
    /// Sessions whose resolution hit a storage error
    pub failed: usize,
}

/// Drives pending payments to a terminal status.
pub struct ReconciliationEngine {
    events: Arc<dyn EventStore>,
    sessions: Arc<dyn PaymentSessionStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    sync: Arc<ProjectionSync>,
    clock: Arc<dyn Clock>,
    query_after: Duration,
    hard_deadline: Duration,
}

impl ReconciliationEngine {
    /// Create an engine with the default windows
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        sessions: Arc<dyn PaymentSessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        sync: Arc<ProjectionSync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            sessions,
            gateway,
            notifier,
            sync,
            clock,
            query_after: DEFAULT_QUERY_AFTER,
            hard_deadline: DEFAULT_HARD_DEADLINE,
        }
    }

    /// Override the query and expiry windows
    #[must_use]
    pub const fn with_windows(mut self, query_after: Duration, hard_deadline: Duration) -> Self {
        self.query_after = query_after;
        self.hard_deadline = hard_deadline;
        self
    }

    /// Apply a provider callback.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the ledger or session store failed; the poll
    /// sweep will retry the session.
    #[tracing::instrument(skip_all, fields(checkout_request_id = %notice.checkout_request_id))]
    pub async fn handle_callback(&self, notice: &CallbackNotice) -> Result<ReconcileOutcome, StoreError> {
        tracing::info!(
            result_code = %notice.result_code,
            result_desc = %notice.result_desc,
            receipt = notice.receipt_number.as_deref().unwrap_or("-"),
            "Payment callback received"
        );

        let result = self.apply_result(&notice.checkout_request_id, notice.outcome()).await;
        metrics::record_callback(match &result {
            Ok(ReconcileOutcome::Applied(_)) => "applied",
            Ok(ReconcileOutcome::Noop(_) | ReconcileOutcome::Detached) => "noop",
            Ok(ReconcileOutcome::Deferred) => "deferred",
            Ok(ReconcileOutcome::UnknownSession) => "unknown",
            Err(_) => "error",
        });
        result
    }

    /// Apply a definite payment result to the attendance and session
    /// carrying `checkout_request_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub async fn apply_result(
        &self,
        checkout_request_id: &CheckoutRequestId,
        outcome: PaymentOutcome,
    ) -> Result<ReconcileOutcome, StoreError> {
        self.resolve(checkout_request_id, SessionOutcome::from(outcome)).await
    }

    async fn resolve(
        &self,
        checkout_request_id: &CheckoutRequestId,
        outcome: SessionOutcome,
    ) -> Result<ReconcileOutcome, StoreError> {
        let now = self.clock.now();
        let session = self.sessions.find(checkout_request_id).await?;
        let target = outcome.target_status();

        let result = match self.events.transition(checkout_request_id, target, now).await? {
            TransitionOutcome::Applied { event_id, attendance } => {
                tracing::info!(
                    event_id = %event_id,
                    user_id = %attendance.user_id,
                    status = %attendance.status,
                    "Payment status applied"
                );
                self.sync
                    .propagate(
                        event_id,
                        attendance.user_id,
                        ProjectionChange::from_attendance(event_id, Some(&attendance)),
                    )
                    .await;
                self.notify(event_id, attendance.user_id, checkout_request_id, &outcome);
                metrics::record_payment(status_label(&outcome), resolution_secs(session.as_ref(), now));
                ReconcileOutcome::Applied(target)
            }
            TransitionOutcome::AlreadyTerminal(status) => {
                tracing::debug!(%status, "Payment already resolved, ignoring result");
                ReconcileOutcome::Noop(status)
            }
            TransitionOutcome::NotFound => match &session {
                Some(session) if self.awaiting_reference(session).await? => {
                    tracing::info!("Payment reference not attached yet, leaving session open");
                    return Ok(ReconcileOutcome::Deferred);
                }
                Some(_) => {
                    tracing::info!("No attendance carries this payment, closing session");
                    ReconcileOutcome::Detached
                }
                None => {
                    tracing::warn!(%checkout_request_id, "Payment result for unknown checkout request");
                    return Ok(ReconcileOutcome::UnknownSession);
                }
            },
        };

        if self.sessions.resolve(checkout_request_id, &outcome, now).await? {
            tracing::debug!(?outcome, "Payment session closed");
        }
        Ok(result)
    }

    /// Whether the session's registration is still Pending without any
    /// reference, i.e. between opening the session and attaching its id.
    async fn awaiting_reference(&self, session: &PaymentSession) -> Result<bool, StoreError> {
        let event = self.events.find_event(session.event_id).await?;
        Ok(event
            .as_ref()
            .and_then(|e| e.attendance_of(session.user_id))
            .is_some_and(|a| a.status == PaymentStatus::Pending && a.payment_reference.is_none()))
    }

    fn notify(&self, event_id: EventId, user_id: UserId, reference: &CheckoutRequestId, outcome: &SessionOutcome) {
        let notice = PaymentNotice {
            event_id,
            user_id,
            status: outcome.target_status(),
            reference: reference.clone(),
            description: match outcome {
                SessionOutcome::Paid => "Payment received".to_string(),
                SessionOutcome::Failed { description, .. } => description.clone(),
                SessionOutcome::Expired => "Payment not confirmed in time".to_string(),
            },
        };
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(
            async move {
                if let Err(error) = notifier.payment_resolved(&notice).await {
                    tracing::warn!(%error, "Payment notification failed");
                }
            }
            .in_current_span(),
        );
    }

    /// Query the provider for every session older than `query_after`, apply
    /// definite results, and expire sessions older than `hard_deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if unresolved sessions cannot be listed.
    /// Failures on individual sessions are logged and counted.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let overdue = self.sessions.unresolved_before(now - self.query_after).await?;

        let mut report = SweepReport::default();
        for session in overdue {
            report.checked += 1;
            let id = &session.checkout_request_id;
            let expired = now - session.created_at >= self.hard_deadline;

            let outcome = match self.gateway.query_status(id).await {
                Ok(status) => Some(SessionOutcome::from(status.outcome())),
                Err(error) if expired => {
                    tracing::warn!(
                        checkout_request_id = %id,
                        %error,
                        "Payment unresolved past hard deadline, expiring"
                    );
                    Some(SessionOutcome::Expired)
                }
                Err(error) => {
                    tracing::debug!(checkout_request_id = %id, %error, "Payment still pending");
                    None
                }
            };

            let Some(outcome) = outcome else {
                report.still_pending += 1;
                continue;
            };
            let expiring = outcome == SessionOutcome::Expired;

            match self.resolve(id, outcome).await {
                Ok(ReconcileOutcome::Deferred) => report.still_pending += 1,
                Ok(_) if expiring => {
                    report.expired += 1;
                    metrics::record_session_expired();
                }
                Ok(_) => report.resolved += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(checkout_request_id = %id, %error, "Failed to resolve payment session");
                }
            }
        }

        if report.checked > 0 {
            tracing::info!(
                checked = report.checked,
                resolved = report.resolved,
                expired = report.expired,
                still_pending = report.still_pending,
                failed = report.failed,
                "Payment sweep complete"
            );
        }
        Ok(report)
    }

    /// Clean up Pending reservations older than `hard_deadline` that the
    /// session sweep cannot reach. Returns how many were released or settled.
    ///
    /// - without a payment reference: released
    /// - with a reference whose session is missing: failed as expired
    /// - with a reference whose session is already closed: the recorded
    ///   outcome is applied
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub async fn release_orphans(&self) -> Result<usize, StoreError> {
        let cutoff = self.clock.now() - self.hard_deadline;
        let mut released = 0;

        for reference in self.events.referenced_pending_before(cutoff).await? {
            let outcome = match self.sessions.find(&reference).await? {
                Some(session) if !session.is_resolved() => continue,
                Some(session) => session.outcome.unwrap_or(SessionOutcome::Expired),
                None => SessionOutcome::Expired,
            };
            if let ReconcileOutcome::Applied(status) = self.resolve(&reference, outcome).await? {
                tracing::warn!(
                    checkout_request_id = %reference,
                    %status,
                    "Settled payment left without an open session"
                );
                metrics::record_orphan_released();
                released += 1;
            }
        }

        for (event_id, user_id) in self.events.unreferenced_pending_before(cutoff).await? {
            if self.events.release_pending(event_id, user_id).await? == ReleaseOutcome::Released {
                tracing::warn!(
                    event_id = %event_id,
                    user_id = %user_id,
                    "Released reservation without payment reference"
                );
                self.sync
                    .propagate(event_id, user_id, ProjectionChange::Remove)
                    .await;
                metrics::record_orphan_released();
                released += 1;
            }
        }
        Ok(released)
    }
}

const fn status_label(outcome: &SessionOutcome) -> &'static str {
    match outcome {
        SessionOutcome::Paid => "paid",
        SessionOutcome::Failed { .. } => "failed",
        SessionOutcome::Expired => "expired",
    }
}

#[allow(clippy::cast_precision_loss)] // Resolution times are minutes, not centuries
fn resolution_secs(session: Option<&PaymentSession>, now: DateTime<Utc>) -> f64 {
    session.map_or(0.0, |s| (now - s.created_at).num_milliseconds() as f64 / 1000.0)
}
