//! # M-Pesa Daraja Client
//!
//! Client for the Safaricom Daraja STK Push API: OAuth token caching,
//! payment initiation, status queries and callback parsing.
//!
//! ## Example
//!
//! ```no_run
//! use rsvp_mpesa::{MpesaClient, MpesaConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MpesaConfig::sandbox("key", "secret", "passkey", "174379")
//!         .with_callback_url("https://example.com/events/mpesa/callback");
//!     let client = MpesaClient::new(config)?;
//!
//!     let push = client.initiate_payment("0712345678", 500, "Event-42").await?;
//!     println!("checkout request: {}", push.checkout_request_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - Single-flight OAuth token refresh shared by every clone of the client
//! - Phone normalisation to the `2547XXXXXXXX` form
//! - Password and timestamp signing in East Africa Time
//! - Callback parsing for both the provider envelope and the flat form
//! - [`rsvp_core::PaymentGateway`] implementation

pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod phone;
pub mod signing;
pub mod types;

pub use callback::{parse_callback, CallbackNotice};
pub use client::{AccessToken, MpesaClient};
pub use config::MpesaConfig;
pub use error::MpesaError;
pub use phone::normalize_phone;
pub use types::{StkPushResponse, StkQueryResponse};
