//! Static bearer-token identity.
//!
//! Tokens are configured as `AUTH_TOKENS="token:user-uuid,token2:user-uuid2"`.

use async_trait::async_trait;
use rsvp_core::{IdentityProvider, StoreError, UserId};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Malformed `AUTH_TOKENS` entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid token entry {entry:?}: {reason}")]
pub struct TokenParseError {
    /// Offending entry
    pub entry: String,
    /// What is wrong with it
    pub reason: &'static str,
}

/// Resolves bearer tokens from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenIdentity {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenIdentity {
    /// Build from `(token, user)` pairs
    #[must_use]
    pub fn new(tokens: impl IntoIterator<Item = (String, UserId)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Parse a comma-separated `token:uuid` list. Blank entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`TokenParseError`] for an entry without a `:`, with an empty
    /// token, or with an invalid UUID.
    pub fn parse(spec: &str) -> Result<Self, TokenParseError> {
        let mut tokens = HashMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let error = |reason| TokenParseError {
                entry: entry.to_string(),
                reason,
            };
            let (token, user) = entry.split_once(':').ok_or_else(|| error("expected token:uuid"))?;
            let token = token.trim();
            if token.is_empty() {
                return Err(error("empty token"));
            }
            let user = Uuid::parse_str(user.trim()).map_err(|_| error("invalid user id"))?;
            tokens.insert(token.to_string(), UserId::from_uuid(user));
        }
        Ok(Self { tokens })
    }

    /// Number of configured tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self.tokens.get(token).copied())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ALICE: &str = "5f0c6a3e-8a51-4c1e-9f0e-1d2b3c4d5e6f";

    #[tokio::test]
    async fn test_parse_and_resolve() {
        let identity = StaticTokenIdentity::parse(&format!(" alice:{ALICE} , ,")).unwrap();
        assert_eq!(identity.len(), 1);

        let user = identity.resolve("alice").await.unwrap().unwrap();
        assert_eq!(user.to_string(), ALICE);
        assert!(identity.resolve("mallory").await.unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_entries() {
        assert_eq!(StaticTokenIdentity::parse("alice").unwrap_err().reason, "expected token:uuid");
        assert_eq!(StaticTokenIdentity::parse(&format!(":{ALICE}")).unwrap_err().reason, "empty token");
        assert_eq!(StaticTokenIdentity::parse("alice:42").unwrap_err().reason, "invalid user id");
        assert!(StaticTokenIdentity::parse("").unwrap().is_empty());
    }
}
