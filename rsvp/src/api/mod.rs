//! HTTP API handlers.

pub mod callback;
pub mod error;
pub mod events;
pub mod extractors;
pub mod rsvp;
pub mod users;

pub use error::ApiError;
pub use extractors::CurrentUser;
