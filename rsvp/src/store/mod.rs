//! Store implementations.
//!
//! - [`memory`]: in-process stores, the default backend
//! - `postgres`: `sqlx` stores behind the `postgres` feature

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryEventStore, InMemoryProjectionStore, InMemorySessionStore};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresEventStore, PostgresProjectionStore, PostgresSessionStore};
