//! # RSVP
//!
//! Capacity-bounded event registration with asynchronous M-Pesa payment.
//!
//! ```text
//!  POST /events/:id/rsvp ──▶ RegistrationCoordinator ──▶ capacity gate (atomic)
//!                                   │                         │
//!                                   │ STK push                ▼
//!                                   ▼                    Event ledger ──▶ ProjectionSync ──▶ User projection
//!                              PaymentGateway                 ▲
//!                                   │                         │ CAS by checkout id
//!  POST /events/mpesa/callback ─────┴──▶ ReconciliationEngine ┘
//!                     poll sweep ───────▶
//! ```
//!
//! - [`capacity`]: the admission decision run inside the store's atomic section
//! - [`coordinator`]: register and cancel
//! - [`reconciliation`]: callback, poll sweep, hard deadline, orphan release
//! - [`consistency`]: keeps the user projection converged with the ledger
//! - [`store`]: in-memory and `PostgreSQL` stores
//! - [`api`] / [`server`]: the HTTP surface
//! - [`app`]: wiring, background loops and graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod app;
pub mod capacity;
pub mod config;
pub mod consistency;
pub mod coordinator;
pub mod identity;
pub mod metrics;
pub mod notifier;
pub mod reconciliation;
pub mod retry;
pub mod server;
pub mod store;

pub use config::Config;
pub use consistency::{ProjectionChange, ProjectionSync};
pub use coordinator::{Registration, RegistrationCoordinator};
pub use reconciliation::{ReconcileOutcome, ReconciliationEngine, SweepReport};
