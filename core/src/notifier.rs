//! Best-effort user notifications.

use crate::types::{CheckoutRequestId, EventId, PaymentStatus, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A payment reached a terminal status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotice {
    /// Event paid for
    pub event_id: EventId,
    /// Paying user
    pub user_id: UserId,
    /// Terminal status
    pub status: PaymentStatus,
    /// Checkout request id
    pub reference: CheckoutRequestId,
    /// Provider description or expiry reason
    pub description: String,
}

/// Delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Sends payment notices to users.
///
/// Failures are logged by callers and never roll back state.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notice
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery failed.
    async fn payment_resolved(&self, notice: &PaymentNotice) -> Result<(), NotifyError>;
}
