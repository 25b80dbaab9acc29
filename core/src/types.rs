//! Domain types for event registration and payment reconciliation.
//!
//! The [`Event`] owns the authoritative attendee ledger. A [`UserProjection`]
//! mirrors the same facts per user for reads and is rebuilt from the ledger
//! whenever the two disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gateway-issued correlation id linking an STK push to its eventual result.
///
/// Doubles as the attendance `paymentReference`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckoutRequestId(String);

impl CheckoutRequestId {
    /// Wrap a provider-issued id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckoutRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Gateway-issued merchant-side request id
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantRequestId(String);

impl MerchantRequestId {
    /// Wrap a provider-issued id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MerchantRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Money amount in minor units (cents). Single currency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount (free events)
    pub const ZERO: Self = Self(0);

    /// Creates money from minor units
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates money from whole units
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units.saturating_mul(100))
    }

    /// Amount in minor units
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Whether the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Amount rounded up to the nearest whole unit.
    ///
    /// The gateway only accepts whole shillings, so `499.50` charges `500`.
    #[must_use]
    pub const fn whole_units_ceil(&self) -> u64 {
        self.0.div_ceil(100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KES {}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Payment status
// ============================================================================

/// Payment status of one attendance.
///
/// `Pending` and `Paid` hold a capacity slot; `Failed` does not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Slot reserved, payment not yet confirmed
    Pending,
    /// Payment confirmed (or free event)
    Paid,
    /// Payment failed, cancelled or timed out
    Failed,
}

/// Attempted transition out of a terminal status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("cannot transition payment status from {from} to {to}")]
pub struct InvalidTransition {
    /// Current status
    pub from: PaymentStatus,
    /// Requested status
    pub to: PaymentStatus,
}

impl PaymentStatus {
    /// Whether this status is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        match self {
            Self::Pending => false,
            Self::Paid | Self::Failed => true,
        }
    }

    /// Whether an attendance in this status counts against capacity
    #[must_use]
    pub const fn holds_slot(self) -> bool {
        match self {
            Self::Pending | Self::Paid => true,
            Self::Failed => false,
        }
    }

    /// Apply a transition.
    ///
    /// Only `Pending → Paid` and `Pending → Failed` are legal.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for any transition out of a terminal
    /// status or back into `Pending`.
    pub const fn transition(self, to: Self) -> Result<Self, InvalidTransition> {
        match (self, to) {
            (Self::Pending, Self::Paid | Self::Failed) => Ok(to),
            (Self::Pending | Self::Paid | Self::Failed, _) => Err(InvalidTransition { from: self, to }),
        }
    }

    /// Stable lowercase name, used for storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown payment status name.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown payment status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Event ledger
// ============================================================================

/// One user's registration on an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    /// Registered user
    pub user_id: UserId,
    /// Payment status
    pub status: PaymentStatus,
    /// Checkout request id (paid events, once initiation succeeded)
    pub payment_reference: Option<CheckoutRequestId>,
    /// When the payment was confirmed
    pub payment_date: Option<DateTime<Utc>>,
    /// When the slot was reserved
    pub reserved_at: DateTime<Utc>,
}

impl Attendance {
    /// Pending reservation awaiting payment
    #[must_use]
    pub const fn pending(user_id: UserId, reserved_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: PaymentStatus::Pending,
            payment_reference: None,
            payment_date: None,
            reserved_at,
        }
    }

    /// Confirmed attendance (free events)
    #[must_use]
    pub const fn confirmed(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: PaymentStatus::Paid,
            payment_reference: None,
            payment_date: Some(at),
            reserved_at: at,
        }
    }

    /// Projection entry for this attendance
    #[must_use]
    pub fn to_ref(&self, event_id: EventId) -> AttendanceRef {
        AttendanceRef {
            event_id,
            status: self.status,
            payment_reference: self.payment_reference.clone(),
            payment_date: self.payment_date,
        }
    }
}

/// Why the capacity gate refused a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The user already holds a Pending or Paid attendance
    DuplicateRegistration,
    /// Every slot is held by a Pending or Paid attendance
    CapacityExceeded,
}

/// A capacity-bounded event and its attendee ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event ID
    pub id: EventId,
    /// Title
    pub title: String,
    /// Maximum number of Pending + Paid attendances
    pub capacity: u32,
    /// Ticket price; zero for free events
    pub price: Money,
    /// Attendee ledger, ordered by reservation, unique by user
    pub attendees: Vec<Attendance>,
    /// When the event was published
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Creates a new event with an empty ledger
    #[must_use]
    pub fn new(title: impl Into<String>, capacity: u32, price: Money, created_at: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            title: title.into(),
            capacity,
            price,
            attendees: Vec::new(),
            created_at,
        }
    }

    /// Whether registration requires payment
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !self.price.is_zero()
    }

    /// Number of attendances holding a slot (Pending or Paid)
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.attendees
            .iter()
            .filter(|a| a.status.holds_slot())
            .count()
    }

    /// Slots still available
    #[must_use]
    pub fn remaining_spots(&self) -> u32 {
        let live = u32::try_from(self.live_count()).unwrap_or(u32::MAX);
        self.capacity.saturating_sub(live)
    }

    /// Whether no slot is available
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.remaining_spots() == 0
    }

    /// Attendance of a given user
    #[must_use]
    pub fn attendance_of(&self, user_id: UserId) -> Option<&Attendance> {
        self.attendees.iter().find(|a| a.user_id == user_id)
    }

    /// Mutable attendance of a given user
    pub fn attendance_of_mut(&mut self, user_id: UserId) -> Option<&mut Attendance> {
        self.attendees.iter_mut().find(|a| a.user_id == user_id)
    }

    /// Attendance carrying a payment reference
    #[must_use]
    pub fn attendance_by_reference(&self, reference: &CheckoutRequestId) -> Option<&Attendance> {
        self.attendees
            .iter()
            .find(|a| a.payment_reference.as_ref() == Some(reference))
    }

    /// Insert an admitted attendance, replacing a Failed one of the same user.
    pub fn admit(&mut self, attendance: Attendance) {
        if let Some(existing) = self.attendance_of_mut(attendance.user_id) {
            *existing = attendance;
        } else {
            self.attendees.push(attendance);
        }
    }

    /// Remove a user's attendance, returning it
    pub fn remove_attendance(&mut self, user_id: UserId) -> Option<Attendance> {
        let index = self.attendees.iter().position(|a| a.user_id == user_id)?;
        Some(self.attendees.remove(index))
    }
}

// ============================================================================
// User projection
// ============================================================================

/// A user's mirrored view of one attendance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRef {
    /// Event attended
    pub event_id: EventId,
    /// Payment status
    pub status: PaymentStatus,
    /// Checkout request id, if any
    pub payment_reference: Option<CheckoutRequestId>,
    /// When payment was confirmed
    pub payment_date: Option<DateTime<Utc>>,
}

/// Read-optimised, derived copy of a user's attendances.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProjection {
    /// Owner
    pub user_id: UserId,
    /// Attended events
    pub attending: Vec<AttendanceRef>,
}

impl UserProjection {
    /// Empty projection for a user
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            attending: Vec::new(),
        }
    }

    /// Entry for an event
    #[must_use]
    pub fn get(&self, event_id: EventId) -> Option<&AttendanceRef> {
        self.attending.iter().find(|r| r.event_id == event_id)
    }

    /// Insert or overwrite the entry for `entry.event_id`
    pub fn upsert(&mut self, entry: AttendanceRef) {
        if let Some(existing) = self.attending.iter_mut().find(|r| r.event_id == entry.event_id) {
            *existing = entry;
        } else {
            self.attending.push(entry);
        }
    }

    /// Remove the entry for an event; returns whether one existed
    pub fn remove(&mut self, event_id: EventId) -> bool {
        let before = self.attending.len();
        self.attending.retain(|r| r.event_id != event_id);
        self.attending.len() != before
    }

    /// Same entries regardless of order
    #[must_use]
    pub fn same_entries(&self, other: &Self) -> bool {
        self.attending.len() == other.attending.len()
            && self.attending.iter().all(|r| other.get(r.event_id) == Some(r))
    }
}

// ============================================================================
// Payment sessions
// ============================================================================

/// Final payment result reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    /// Result code `0`
    Paid,
    /// Any other result code
    Failed {
        /// Provider result code
        code: String,
        /// Provider description
        description: String,
    },
}

impl PaymentOutcome {
    /// Provider result code signalling success
    pub const SUCCESS_CODE: &'static str = "0";

    /// Interpret a provider result code
    #[must_use]
    pub fn from_result_code(code: &str, description: &str) -> Self {
        if code.trim() == Self::SUCCESS_CODE {
            Self::Paid
        } else {
            Self::Failed {
                code: code.trim().to_string(),
                description: description.to_string(),
            }
        }
    }

    /// Status the attendance moves to
    #[must_use]
    pub const fn target_status(&self) -> PaymentStatus {
        match self {
            Self::Paid => PaymentStatus::Paid,
            Self::Failed { .. } => PaymentStatus::Failed,
        }
    }
}

/// How a payment session was closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Provider confirmed payment
    Paid,
    /// Provider reported a failure
    Failed {
        /// Provider result code
        code: String,
        /// Provider description
        description: String,
    },
    /// No result before the hard deadline
    Expired,
}

impl SessionOutcome {
    /// Status the attendance moves to
    #[must_use]
    pub const fn target_status(&self) -> PaymentStatus {
        match self {
            Self::Paid => PaymentStatus::Paid,
            Self::Failed { .. } | Self::Expired => PaymentStatus::Failed,
        }
    }
}

impl From<PaymentOutcome> for SessionOutcome {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Paid => Self::Paid,
            PaymentOutcome::Failed { code, description } => Self::Failed { code, description },
        }
    }
}

/// An initiated STK push awaiting its result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    /// Gateway correlation id
    pub checkout_request_id: CheckoutRequestId,
    /// Merchant request id
    pub merchant_request_id: MerchantRequestId,
    /// Event paid for
    pub event_id: EventId,
    /// Paying user
    pub user_id: UserId,
    /// Amount charged, whole units
    pub amount: u64,
    /// Canonical phone number charged
    pub phone: String,
    /// When the push was initiated
    pub created_at: DateTime<Utc>,
    /// When the session was closed
    pub resolved_at: Option<DateTime<Utc>>,
    /// How the session was closed
    pub outcome: Option<SessionOutcome>,
}

impl PaymentSession {
    /// Whether the session has been closed
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
