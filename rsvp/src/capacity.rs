//! Capacity gate.
//!
//! Pure admission decision for one registration against one ledger snapshot.
//! Stores run [`evaluate`] inside their atomic section (see
//! [`rsvp_core::EventStore::reserve`]); on its own it provides no concurrency
//! guarantee.

use chrono::{DateTime, Utc};
use rsvp_core::{Attendance, Event, PaymentStatus, Rejection, UserId};

/// An accepted registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admission {
    /// Attendance to commit
    pub attendance: Attendance,
    /// Whether it replaces a Failed attendance of the same user
    pub replaces_failed: bool,
}

/// Decide whether `user_id` may register for `event` at `now`.
///
/// Paid events admit a Pending attendance; free events admit a Paid one
/// stamped with `now`.
///
/// # Errors
///
/// - [`Rejection::DuplicateRegistration`] if the user already holds a
///   Pending or Paid attendance
/// - [`Rejection::CapacityExceeded`] if every slot is held
pub fn evaluate(event: &Event, user_id: UserId, now: DateTime<Utc>) -> Result<Admission, Rejection> {
    let existing = event.attendance_of(user_id);

    if existing.is_some_and(|a| a.status.holds_slot()) {
        return Err(Rejection::DuplicateRegistration);
    }

    if event.is_full() {
        return Err(Rejection::CapacityExceeded);
    }

    let attendance = if event.is_paid() {
        Attendance::pending(user_id, now)
    } else {
        Attendance::confirmed(user_id, now)
    };

    Ok(Admission {
        attendance,
        replaces_failed: existing.is_some_and(|a| a.status == PaymentStatus::Failed),
    })
}

/// [`evaluate`] shaped as a store admission rule.
pub fn admission_rule(
    user_id: UserId,
    now: DateTime<Utc>,
) -> impl Fn(&Event) -> Result<Attendance, Rejection> + Send + Sync {
    move |event| evaluate(event, user_id, now).map(|admission| admission.attendance)
}
