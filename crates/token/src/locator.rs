//! Locator resolution seam.
//!
//! A locator is a resolvable URL granting time-limited read access to one stored file. The token
//! builder never talks to storage directly; it asks a [`LocatorResolver`] for one locator per file
//! reference.

use async_trait::async_trait;

/// Failure reported by a resolver.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    /// The reference does not name a stored file.
    #[error("file reference not found: {0}")]
    NotFound(String),

    /// The storage backend could not issue a locator (unreachable, unauthorised, ...).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Issues time-limited locators for opaque file references.
#[async_trait]
pub trait LocatorResolver: Send + Sync {
    /// Returns a URL for `reference` that stays valid for `ttl_seconds`.
    async fn resolve(&self, reference: &str, ttl_seconds: u64) -> Result<String, LocatorError>;
}
