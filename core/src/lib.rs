//! # RSVP Core
//!
//! Domain types and collaborator traits for capacity-bounded event
//! registration with asynchronous mobile-money payment.
//!
//! The crate is deliberately free of I/O. It defines:
//!
//! - **Types**: events, the attendee ledger, the per-user projection and
//!   payment sessions ([`types`])
//! - **Errors**: the registration error taxonomy ([`error`])
//! - **Collaborators**: storage, payment gateway, notifier and identity
//!   traits injected into the service ([`store`], [`gateway`], [`notifier`],
//!   [`identity`])
//! - **Environment**: the [`environment::Clock`] abstraction for testable time
//!
//! # Ownership model
//!
//! ```text
//!   Event ledger (authoritative)  ──derive──▶  User projection (cache)
//!        ▲                                          │
//!        │ CAS transitions                          └─ repaired, never trusted
//!   PaymentSession (checkout id → event, user)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod environment;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod notifier;
pub mod store;
pub mod types;

pub use environment::{Clock, SystemClock};
pub use error::{RsvpError, StoreError};
pub use gateway::{GatewayError, PaymentGateway, PaymentInitiation, PaymentRequest, StatusReport};
pub use identity::IdentityProvider;
pub use notifier::{Notifier, NotifyError, PaymentNotice};
pub use store::{
    AdmissionRule, EventStore, PaymentSessionStore, ReleaseOutcome, ReserveOutcome,
    TransitionOutcome, UserProjectionStore,
};
pub use types::*;
