//! Time-limited file locators
//!
//! A locator is a bearer URL for one stored file:
//!
//! ```text
//! {public_url}/files/{hash}?expires={unix_seconds}&signature={hex hmac_sha256(key, "{hash}:{expires}")}
//! ```
//!
//! Nothing is persisted when a locator is issued. The file endpoint recomputes the MAC on every
//! request and refuses the file once `expires` has passed.

use crate::{FileStore, FilesError, LOCATOR_PATH, MIN_SIGNING_KEY_LEN};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use recordlink_token::builder::expiry_after;
use recordlink_token::{Clock, LocatorError, LocatorResolver, SystemClock};
use recordlink_types::Sha256Hash;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies locator query parameters
#[derive(Clone)]
pub struct LocatorSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for LocatorSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocatorSigner").finish_non_exhaustive()
    }
}

impl LocatorSigner {
    /// # Errors
    ///
    /// `InvalidSigningKey` if `key` is shorter than [`MIN_SIGNING_KEY_LEN`] bytes.
    pub fn new(key: &[u8]) -> Result<Self, FilesError> {
        if key.len() < MIN_SIGNING_KEY_LEN {
            return Err(FilesError::InvalidSigningKey(format!(
                "key must be at least {MIN_SIGNING_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| FilesError::InvalidSigningKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Hex-encoded MAC over `"{hash}:{expires_unix}"`.
    pub fn sign(&self, hash: &Sha256Hash, expires_unix: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(message(hash, expires_unix).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a presented locator.
    ///
    /// The signature is checked before the expiry, so a forged locator never learns whether its
    /// expiry would have been accepted. Comparison is constant-time.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` if the signature is not hex or does not match
    /// - `LocatorExpired` if `now` is past `expires_unix`
    pub fn verify(
        &self,
        hash: &Sha256Hash,
        expires_unix: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), FilesError> {
        let presented = hex::decode(signature).map_err(|_| FilesError::InvalidSignature)?;

        let mut mac = self.mac.clone();
        mac.update(message(hash, expires_unix).as_bytes());
        mac.verify_slice(&presented)
            .map_err(|_| FilesError::InvalidSignature)?;

        let expired_at =
            DateTime::from_timestamp(expires_unix, 0).ok_or(FilesError::InvalidSignature)?;
        if now > expired_at {
            return Err(FilesError::LocatorExpired { expired_at });
        }
        Ok(())
    }
}

fn message(hash: &Sha256Hash, expires_unix: i64) -> String {
    format!("{hash}:{expires_unix}")
}

/// [`LocatorResolver`] backed by the local [`FileStore`]
///
/// File references are SHA-256 hashes returned by [`FileStore::add_bytes`].
pub struct SignedLocatorResolver {
    store: Arc<FileStore>,
    signer: LocatorSigner,
    public_url: String,
    clock: Arc<dyn Clock>,
}

impl SignedLocatorResolver {
    pub fn new(store: Arc<FileStore>, signer: LocatorSigner, public_url: impl Into<String>) -> Self {
        Self {
            store,
            signer,
            public_url: public_url.into().trim_end_matches('/').to_owned(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the locator URL for `hash`, valid until `expires_at`.
    pub fn locator_url(&self, hash: &Sha256Hash, expires_at: DateTime<Utc>) -> String {
        let expires = expires_at.timestamp();
        format!(
            "{}{}/{}?expires={}&signature={}",
            self.public_url,
            LOCATOR_PATH,
            hash,
            expires,
            self.signer.sign(hash, expires)
        )
    }
}

#[async_trait]
impl LocatorResolver for SignedLocatorResolver {
    async fn resolve(&self, reference: &str, ttl_seconds: u64) -> Result<String, LocatorError> {
        let hash = Sha256Hash::parse(reference.trim())
            .map_err(|_| LocatorError::NotFound(reference.to_owned()))?;

        match self.store.contains(&hash) {
            Ok(true) => {}
            Ok(false) => return Err(LocatorError::NotFound(reference.to_owned())),
            Err(e) => {
                tracing::error!(%hash, error = %e, "file store lookup failed");
                return Err(LocatorError::Unavailable(e.to_string()));
            }
        }

        let expires_at = expiry_after(self.clock.now(), ttl_seconds)
            .map_err(|e| LocatorError::Unavailable(e.to_string()))?;

        Ok(self.locator_url(&hash, expires_at))
    }
}
