//! Error taxonomy for registration and storage.

use crate::gateway::GatewayError;
use crate::types::{EventId, Rejection};
use thiserror::Error;

/// Storage failures surfaced by the store traits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A uniqueness or ownership constraint rejected the write
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors returned to callers of the registration coordinator.
#[derive(Error, Debug)]
pub enum RsvpError {
    /// Input rejected before any state change (e.g. malformed phone)
    #[error("validation failed: {0}")]
    Validation(String),

    /// The user already holds a Pending or Paid attendance
    #[error("already registered for this event")]
    DuplicateRegistration,

    /// No slot available
    #[error("event is at full capacity")]
    CapacityExceeded,

    /// Unknown event
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// The gateway refused or failed the STK push; the slot was released
    #[error("payment initiation failed: {0}")]
    PaymentInitiation(#[source] GatewayError),

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl RsvpError {
    /// Whether the caller supplied bad input or hit a business rule
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::DuplicateRegistration
                | Self::CapacityExceeded
                | Self::EventNotFound(_)
        )
    }
}

impl From<Rejection> for RsvpError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::DuplicateRegistration => Self::DuplicateRegistration,
            Rejection::CapacityExceeded => Self::CapacityExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(RsvpError::CapacityExceeded.is_client_error());
        assert!(RsvpError::Validation("phone".into()).is_client_error());
        assert!(!RsvpError::Storage(StoreError::Unavailable("down".into())).is_client_error());
        assert!(
            !RsvpError::PaymentInitiation(GatewayError::Network("timeout".into())).is_client_error()
        );
    }
}
