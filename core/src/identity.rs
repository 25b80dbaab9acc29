//! Caller identity resolution.

use crate::error::StoreError;
use crate::types::UserId;
use async_trait::async_trait;

/// Resolves a bearer credential to a user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up the user owning `token`; `Ok(None)` for unknown tokens.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing directory is unreachable.
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, StoreError>;
}
