//! # Record Link Token
//!
//! Access-token codec for sharing patient records through scannable codes.
//!
//! A patient issues a token describing temporary access to stored files (or embedding record
//! data directly). The token is rendered into a QR code, scanned by a clinician, and decoded back
//! into a typed [`AccessPayload`] on the receiving side.
//!
//! This crate contains:
//! - The payload model ([`payload`]): a tagged sum type with three variants
//! - The builder ([`TokenBuilder`]): assembles payloads and encodes them to transport strings
//! - The decoder ([`decode`]): recovers a payload from arbitrary scanned text, never failing hard
//! - Collaborator seams: [`LocatorResolver`] for time-limited file URLs, [`ImageRenderer`] for
//!   turning a token into image bytes, and [`Clock`] for deterministic issuance times
//! - [`QrPngRenderer`]: the PNG QR renderer used by the binaries
//!
//! **No storage or transport concerns**: the file store and the REST surface live in
//! `recordlink-files`, `recordlink-core` and `api-rest`.

pub mod builder;
pub mod clock;
pub mod decoder;
pub mod locator;
pub mod payload;
pub mod render;

pub use builder::{BuilderOptions, IssuedToken, TokenBuilder, TokenEncoding};
pub use clock::{Clock, FixedClock, SystemClock};
pub use decoder::{decode, DecodeOutcome, Rejection};
pub use locator::{LocatorError, LocatorResolver};
pub use payload::{
    AccessPayload, DataAccess, LinkAccess, PatientSummary, PatientSummaryFields, PayloadKind,
    RecordSummary,
};
pub use render::{
    qr_filename, ErrorCorrection, ImageRenderer, QrPngRenderer, RenderError, RenderOptions,
};

use chrono::{DateTime, Utc};

/// Errors returned while issuing or checking a token.
///
/// Decoding never produces a `TokenError`; see [`DecodeOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to resolve locator for {reference}: {source}")]
    UpstreamResolution {
        reference: String,
        #[source]
        source: LocatorError,
    },

    #[error("failed to serialize payload: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("token of {len} bytes exceeds the {capacity}-byte capacity of a scannable image")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("token expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
}

/// Type alias for Results that can fail with a [`TokenError`].
pub type TokenResult<T> = Result<T, TokenError>;
