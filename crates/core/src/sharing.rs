//! Record sharing orchestration.
//!
//! [`SharingService`] owns the file store, the locator signer and the token builder, all built
//! from one [`CoreConfig`]. Callers store files, issue tokens over them, and inspect scanned
//! codes. Everything returned here is a plain value; transport concerns stay in `api-rest` and
//! the CLI.

use crate::{CoreConfig, CoreError, CoreResult};
use chrono::{DateTime, Utc};
use recordlink_files::{FileMetadata, FileStore, FilesError, LocatorSigner, SignedLocatorResolver};
use recordlink_token::{
    decode, AccessPayload, Clock, DecodeOutcome, ImageRenderer, IssuedToken, PatientSummaryFields,
    QrPngRenderer, RecordSummary, Rejection, SystemClock, TokenBuilder, TokenEncoding,
};
use recordlink_types::{NonEmptyText, Sha256Hash};
use std::sync::Arc;

/// What a scanned code turned out to be, after the expiry check.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanReport {
    /// A payload that is currently usable.
    Valid {
        payload: AccessPayload,
        encoding: TokenEncoding,
    },
    /// A well-formed payload whose `expiresAt` has passed.
    Expired {
        payload: AccessPayload,
        expired_at: DateTime<Utc>,
    },
    /// JSON was found but it is not an access token.
    Unrecognized { reason: Rejection },
    /// Nothing decodable.
    Unreadable,
}

impl ScanReport {
    /// Short machine-readable status.
    pub fn status(&self) -> &'static str {
        match self {
            ScanReport::Valid { .. } => "valid",
            ScanReport::Expired { .. } => "expired",
            ScanReport::Unrecognized { .. } => "unrecognized",
            ScanReport::Unreadable => "unreadable",
        }
    }

    pub fn payload(&self) -> Option<&AccessPayload> {
        match self {
            ScanReport::Valid { payload, .. } | ScanReport::Expired { payload, .. } => {
                Some(payload)
            }
            _ => None,
        }
    }
}

/// Decode `scanned` and classify it against `now`.
pub fn inspect(scanned: &str, now: DateTime<Utc>) -> ScanReport {
    match decode(scanned) {
        DecodeOutcome::Payload { payload, encoding } => match payload.expires_at() {
            Some(expired_at) if payload.is_expired_at(now) => ScanReport::Expired {
                payload,
                expired_at,
            },
            _ => ScanReport::Valid { payload, encoding },
        },
        DecodeOutcome::Unrecognized { reason, .. } => {
            tracing::debug!(%reason, "scanned JSON is not an access token");
            ScanReport::Unrecognized { reason }
        }
        DecodeOutcome::ParseFailure => ScanReport::Unreadable,
    }
}

/// Bytes of a shared file served through a locator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedFile {
    pub hash: Sha256Hash,
    pub bytes: Vec<u8>,
    pub media_type: Option<NonEmptyText>,
}

/// Pure sharing operations - no API concerns
#[derive(Clone)]
pub struct SharingService {
    config: CoreConfig,
    store: Arc<FileStore>,
    signer: LocatorSigner,
    builder: TokenBuilder,
    renderer: Arc<dyn ImageRenderer>,
}

impl SharingService {
    /// Creates the service, creating the storage directory if it is missing.
    ///
    /// # Errors
    ///
    /// - `StorageDirCreation` if the storage directory cannot be created
    /// - `Files` if the store root or signing key is rejected
    pub fn new(config: CoreConfig) -> CoreResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// As [`Self::new`], issuing tokens and locators against `clock`.
    pub fn with_clock(config: CoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        std::fs::create_dir_all(config.storage_dir()).map_err(CoreError::StorageDirCreation)?;

        let store = Arc::new(FileStore::new(config.storage_dir())?);
        let signer = LocatorSigner::new(config.signing_key())?;
        let resolver =
            SignedLocatorResolver::new(store.clone(), signer.clone(), config.public_url())
                .with_clock(clock.clone());
        let builder = TokenBuilder::new(Arc::new(resolver))
            .with_clock(clock)
            .with_options(config.builder_options());

        Ok(Self {
            config,
            store,
            signer,
            builder,
            renderer: Arc::new(QrPngRenderer),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Stores an uploaded file; its hash is the reference used in link tokens.
    pub fn store_file(&self, original_filename: &str, bytes: &[u8]) -> CoreResult<FileMetadata> {
        Ok(self.store.add_bytes(original_filename, bytes)?)
    }

    /// Issues a link token over stored files. `ttl_seconds` falls back to the configured default.
    pub async fn issue_link(
        &self,
        file_references: &[String],
        patient_id: &str,
        ttl_seconds: Option<u64>,
    ) -> CoreResult<IssuedToken> {
        let ttl = ttl_seconds.unwrap_or(self.config.link_ttl_seconds());
        Ok(self
            .builder
            .build_link_access(file_references, patient_id, ttl)
            .await?)
    }

    /// Issues a data token. Without `ttl_seconds` the token never expires.
    pub fn issue_data(
        &self,
        patient_id: &str,
        patient_name: &str,
        records: Vec<RecordSummary>,
        ttl_seconds: Option<u64>,
    ) -> CoreResult<IssuedToken> {
        let issued = match ttl_seconds {
            Some(ttl) => {
                self.builder
                    .build_data_access_with_ttl(patient_id, patient_name, records, ttl)?
            }
            None => self
                .builder
                .build_data_access(patient_id, patient_name, records)?,
        };
        Ok(issued)
    }

    pub fn issue_summary(&self, patient: PatientSummaryFields) -> CoreResult<IssuedToken> {
        Ok(self.builder.build_patient_summary(patient)?)
    }

    /// Draws the issued token's scan text as a PNG QR code, using the options of its kind.
    pub fn render_png(&self, issued: &IssuedToken) -> CoreResult<Vec<u8>> {
        Ok(issued.render_with(self.renderer.as_ref())?)
    }

    pub fn inspect(&self, scanned: &str, now: DateTime<Utc>) -> ScanReport {
        inspect(scanned, now)
    }

    /// Serves a file for a presented locator.
    ///
    /// # Errors
    ///
    /// - `Files(InvalidHash)` if `hash` is not canonical
    /// - `Files(InvalidSignature)` or `Files(LocatorExpired)` if the locator is rejected
    /// - `Files(NotFound)` if the locator is genuine but the file is gone
    pub fn open_shared_file(
        &self,
        hash: &str,
        expires_unix: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<SharedFile> {
        let hash = Sha256Hash::parse(hash).map_err(FilesError::from)?;

        if let Err(e) = self.signer.verify(&hash, expires_unix, signature, now) {
            tracing::warn!(%hash, error = %e, "rejected file locator");
            return Err(e.into());
        }

        let bytes = self.store.read(&hash)?;
        let media_type = recordlink_files::detect_media_type(&bytes);
        Ok(SharedFile {
            hash,
            bytes,
            media_type,
        })
    }
}
