//! Registration coordinator.
//!
//! Orchestrates one RSVP: validate, reserve a slot through the atomic
//! capacity gate, and for paid events start the STK push with no lock held.
//! A failed push releases the slot again.
//!
//! ```text
//! register ──validate──▶ reserve (gate, atomic)
//!                           │
//!              free ◀───────┴───────▶ paid
//!               │                      │ initiate_payment (no lock)
//!           Confirmed          ok ◀────┴────▶ err
//!                               │              │
//!                     open session,       release_pending
//!                  attach reference        (compensate)
//!                               │              │
//!                        PaymentPending   PaymentInitiation
//! ```
//!
//! The session is written before the reference reaches the ledger, so every
//! referenced attendance has a session the poll sweep will resolve. If the
//! session cannot be written the slot is released as for a failed push.

use crate::capacity::admission_rule;
use crate::consistency::{ProjectionChange, ProjectionSync};
use crate::metrics;
use rsvp_core::{
    CheckoutRequestId, Clock, Event, EventId, EventStore, PaymentGateway,
    PaymentRequest, PaymentSession, PaymentSessionStore, ReleaseOutcome, ReserveOutcome,
    RsvpError, UserId,
};
use rsvp_mpesa::normalize_phone;
use std::sync::Arc;

/// Description shown on the payer's handset
const TRANSACTION_DESC: &str = "Event Payment";

/// Successful registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    /// Free event: attendance is Paid
    Confirmed,
    /// Paid event: slot held Pending until the payment result arrives
    PaymentPending {
        /// Correlation id of the STK push
        checkout_request_id: CheckoutRequestId,
        /// Message the provider wants shown to the customer
        customer_message: Option<String>,
    },
}

/// Coordinates registration and cancellation.
pub struct RegistrationCoordinator {
    events: Arc<dyn EventStore>,
    sessions: Arc<dyn PaymentSessionStore>,
    gateway: Arc<dyn PaymentGateway>,
    sync: Arc<ProjectionSync>,
    clock: Arc<dyn Clock>,
}

impl RegistrationCoordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        sessions: Arc<dyn PaymentSessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        sync: Arc<ProjectionSync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            sessions,
            gateway,
            sync,
            clock,
        }
    }

    /// Register `user_id` for `event_id`.
    ///
    /// `phone` is required for paid events and ignored for free ones.
    ///
    /// # Errors
    ///
    /// - [`RsvpError::EventNotFound`] for an unknown event
    /// - [`RsvpError::Validation`] for a missing or malformed phone number
    /// - [`RsvpError::DuplicateRegistration`] / [`RsvpError::CapacityExceeded`]
    ///   when the capacity gate refuses
    /// - [`RsvpError::PaymentInitiation`] when the STK push fails; the slot has
    ///   been released
    /// - [`RsvpError::Storage`] on storage failure
    #[tracing::instrument(skip_all, fields(event_id = %event_id, user_id = %user_id))]
    pub async fn register(
        &self,
        event_id: EventId,
        user_id: UserId,
        phone: Option<&str>,
    ) -> Result<Registration, RsvpError> {
        let result = self.try_register(event_id, user_id, phone).await;
        metrics::record_registration(outcome_label(&result));
        match &result {
            Ok(registration) => tracing::info!(?registration, "Registration accepted"),
            Err(error) if error.is_client_error() => tracing::info!(%error, "Registration refused"),
            Err(error) => tracing::error!(%error, "Registration failed"),
        }
        result
    }

    async fn try_register(
        &self,
        event_id: EventId,
        user_id: UserId,
        phone: Option<&str>,
    ) -> Result<Registration, RsvpError> {
        let event = self
            .events
            .find_event(event_id)
            .await?
            .ok_or(RsvpError::EventNotFound(event_id))?;

        let phone = if event.is_paid() {
            Some(validate_payment(&event, phone)?)
        } else {
            None
        };

        let rule = admission_rule(user_id, self.clock.now());
        let (event, attendance) = match self.events.reserve(event_id, &rule).await? {
            ReserveOutcome::Admitted { event, attendance } => (event, attendance),
            ReserveOutcome::Rejected(rejection) => return Err(rejection.into()),
            ReserveOutcome::EventNotFound => return Err(RsvpError::EventNotFound(event_id)),
        };

        self.sync
            .propagate(event_id, user_id, ProjectionChange::from_attendance(event_id, Some(&attendance)))
            .await;

        match phone {
            None => Ok(Registration::Confirmed),
            Some(phone) => self.start_payment(&event, attendance.user_id, phone).await,
        }
    }

    async fn start_payment(&self, event: &Event, user_id: UserId, phone: String) -> Result<Registration, RsvpError> {
        let request = PaymentRequest {
            phone,
            amount: event.price.whole_units_ceil(),
            account_reference: account_reference(event.id),
            description: TRANSACTION_DESC.to_string(),
        };

        let initiation = match self.gateway.initiate_payment(&request).await {
            Ok(initiation) => initiation,
            Err(error) => {
                self.compensate(event.id, user_id).await?;
                return Err(RsvpError::PaymentInitiation(error));
            }
        };

        let reference = initiation.checkout_request_id.clone();
        let session = PaymentSession {
            checkout_request_id: reference.clone(),
            merchant_request_id: initiation.merchant_request_id,
            event_id: event.id,
            user_id,
            amount: request.amount,
            phone: request.phone,
            created_at: self.clock.now(),
            resolved_at: None,
            outcome: None,
        };
        if let Err(error) = self.sessions.insert(&session).await {
            tracing::error!(
                checkout_request_id = %reference,
                %error,
                "Could not record payment session, releasing reservation"
            );
            self.compensate(event.id, user_id).await?;
            return Err(error.into());
        }

        if self.events.attach_reference(event.id, user_id, &reference).await? {
            // Read back from the ledger: a fast callback may already have
            // settled the payment.
            self.sync.refresh(event.id, user_id).await;
        } else {
            // Cancelled while the push was in flight; the poll sweep closes
            // the session.
            tracing::warn!(
                checkout_request_id = %reference,
                "Attendance no longer pending when attaching payment reference"
            );
        }

        Ok(Registration::PaymentPending {
            checkout_request_id: reference,
            customer_message: initiation.customer_message,
        })
    }

    async fn compensate(&self, event_id: EventId, user_id: UserId) -> Result<(), RsvpError> {
        match self.events.release_pending(event_id, user_id).await? {
            ReleaseOutcome::Released => {
                tracing::info!("Released reservation after failed payment initiation");
                self.sync
                    .propagate(event_id, user_id, ProjectionChange::Remove)
                    .await;
            }
            ReleaseOutcome::Retained(attendance) => {
                tracing::warn!(
                    status = %attendance.status,
                    "Reservation changed during payment initiation, left in place"
                );
            }
            ReleaseOutcome::Absent => {}
        }
        Ok(())
    }

    /// Cancel `user_id`'s registration for `event_id`, whatever its status.
    ///
    /// Idempotent: cancelling an absent registration succeeds.
    ///
    /// # Errors
    ///
    /// - [`RsvpError::EventNotFound`] for an unknown event
    /// - [`RsvpError::Storage`] on storage failure
    #[tracing::instrument(skip_all, fields(event_id = %event_id, user_id = %user_id))]
    pub async fn cancel(&self, event_id: EventId, user_id: UserId) -> Result<(), RsvpError> {
        if self.events.find_event(event_id).await?.is_none() {
            return Err(RsvpError::EventNotFound(event_id));
        }

        match self.events.remove_attendance(event_id, user_id).await? {
            Some(removed) => tracing::info!(status = %removed.status, "Registration cancelled"),
            None => tracing::debug!("No registration to cancel"),
        }

        self.sync
            .propagate(event_id, user_id, ProjectionChange::Remove)
            .await;
        Ok(())
    }
}

fn validate_payment(event: &Event, phone: Option<&str>) -> Result<String, RsvpError> {
    let raw = phone
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| RsvpError::Validation("phone number is required for paid events".to_string()))?;

    let canonical = normalize_phone(raw).map_err(|e| RsvpError::Validation(e.to_string()))?;

    if event.price.whole_units_ceil() < 1 {
        return Err(RsvpError::Validation(format!("invalid amount: {}", event.price)));
    }
    Ok(canonical)
}

/// `Event-` followed by the first six hex digits of the id; the provider
/// accepts at most 12 characters.
fn account_reference(event_id: EventId) -> String {
    let prefix: String = event_id.as_uuid().simple().to_string().chars().take(6).collect();
    format!("Event-{prefix}")
}

const fn outcome_label(result: &Result<Registration, RsvpError>) -> &'static str {
    match result {
        Ok(Registration::Confirmed) => "confirmed",
        Ok(Registration::PaymentPending { .. }) => "payment_pending",
        Err(RsvpError::DuplicateRegistration) => "duplicate",
        Err(RsvpError::CapacityExceeded) => "capacity_exceeded",
        Err(RsvpError::Validation(_)) => "invalid",
        Err(RsvpError::EventNotFound(_)) => "not_found",
        Err(RsvpError::PaymentInitiation(_)) => "payment_failed",
        Err(RsvpError::Storage(_)) => "error",
    }
}
