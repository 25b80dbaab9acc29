//! Storage collaborators.
//!
//! Three stores back the service: the authoritative [`EventStore`] ledger, the
//! derived [`UserProjectionStore`] and the [`PaymentSessionStore`] correlating
//! checkout ids to registrations. Every mutating operation that has to be
//! atomic is expressed as a single trait method so implementations can run
//! it under a lock or inside one database transaction.

use crate::error::StoreError;
use crate::types::{
    Attendance, AttendanceRef, CheckoutRequestId, Event, EventId, PaymentSession, PaymentStatus,
    Rejection, SessionOutcome, UserId, UserProjection,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Admission decision evaluated inside the store's atomic section.
///
/// Receives the current ledger and returns the attendance to insert, or the
/// reason for refusing it.
pub type AdmissionRule<'a> = &'a (dyn Fn(&Event) -> Result<Attendance, Rejection> + Send + Sync);

/// Result of [`EventStore::reserve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The attendance was committed; carries the ledger after the write
    Admitted {
        /// Event after admission
        event: Event,
        /// Committed attendance
        attendance: Attendance,
    },
    /// The rule refused the registration; nothing was written
    Rejected(Rejection),
    /// No such event
    EventNotFound,
}

/// Result of [`EventStore::release_pending`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The pending, unreferenced attendance was removed
    Released,
    /// The attendance exists but moved on (referenced or terminal); kept
    Retained(Attendance),
    /// No attendance for this user
    Absent,
}

/// Result of [`EventStore::transition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Pending attendance moved to the target status
    Applied {
        /// Event holding the attendance
        event_id: EventId,
        /// Attendance after the transition
        attendance: Attendance,
    },
    /// Already terminal; nothing changed
    AlreadyTerminal(PaymentStatus),
    /// No attendance carries this reference (cancelled, or never attached)
    NotFound,
}

/// Authoritative event ledger.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the id already exists.
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError>;

    /// Load an event with its ledger.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn find_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError>;

    /// Ids of every stored event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn list_event_ids(&self) -> Result<Vec<EventId>, StoreError>;

    /// Evaluate `rule` against the current ledger and commit its attendance
    /// in one atomic step.
    ///
    /// Two concurrent calls for the same event must observe each other: the
    /// second evaluates against the ledger the first committed. A returned
    /// attendance replaces any existing attendance of the same user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure; nothing is committed.
    async fn reserve(&self, event_id: EventId, rule: AdmissionRule<'_>) -> Result<ReserveOutcome, StoreError>;

    /// Record the payment reference on a user's Pending attendance.
    ///
    /// Returns `false` if there is no Pending attendance to attach to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn attach_reference(
        &self,
        event_id: EventId,
        user_id: UserId,
        reference: &CheckoutRequestId,
    ) -> Result<bool, StoreError>;

    /// Remove a user's attendance only if it is still Pending with no payment
    /// reference. Used to compensate a failed payment initiation and to clean
    /// up orphaned reservations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn release_pending(&self, event_id: EventId, user_id: UserId) -> Result<ReleaseOutcome, StoreError>;

    /// Remove a user's attendance regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn remove_attendance(&self, event_id: EventId, user_id: UserId) -> Result<Option<Attendance>, StoreError>;

    /// Compare-and-swap the attendance carrying `reference` from Pending to
    /// `to`, stamping `payment_date` when `to` is Paid.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn transition(
        &self,
        reference: &CheckoutRequestId,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Pending attendances without a payment reference reserved before
    /// `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn unreferenced_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(EventId, UserId)>, StoreError>;

    /// Payment references of Pending attendances reserved before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn referenced_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CheckoutRequestId>, StoreError>;
}

/// Derived per-user view of attendances.
#[async_trait]
pub trait UserProjectionStore: Send + Sync {
    /// Load a user's projection; `None` if nothing was ever written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn find(&self, user_id: UserId) -> Result<Option<UserProjection>, StoreError>;

    /// Insert or overwrite one entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn upsert_entry(&self, user_id: UserId, entry: &AttendanceRef) -> Result<(), StoreError>;

    /// Remove one entry; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn remove_entry(&self, user_id: UserId, event_id: EventId) -> Result<bool, StoreError>;

    /// Replace a user's whole projection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn replace(&self, projection: &UserProjection) -> Result<(), StoreError>;

    /// Users with a stored projection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError>;
}

/// Payment sessions keyed by checkout request id.
#[async_trait]
pub trait PaymentSessionStore: Send + Sync {
    /// Persist a new session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the checkout id already exists.
    async fn insert(&self, session: &PaymentSession) -> Result<(), StoreError>;

    /// Load a session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn find(&self, checkout_request_id: &CheckoutRequestId) -> Result<Option<PaymentSession>, StoreError>;

    /// Unresolved sessions created before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn unresolved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentSession>, StoreError>;

    /// Close a session if it is still open. Returns `false` if it was
    /// already resolved or does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn resolve(
        &self,
        checkout_request_id: &CheckoutRequestId,
        outcome: &SessionOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
