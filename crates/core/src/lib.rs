//! # Record Link Core
//!
//! Core business logic for sharing patient records through scannable access tokens.
//!
//! This crate wires the pieces together:
//! - [`CoreConfig`]: configuration resolved once at startup
//! - [`SharingService`]: stores files, issues link/data/summary tokens, inspects scanned codes
//!   and serves files for signed locators
//!
//! **No API concerns**: HTTP servers and command-line parsing belong in `api-rest` and the CLI.

pub mod config;
pub mod constants;
mod error;
pub mod sharing;

pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use sharing::{inspect, ScanReport, SharedFile, SharingService};

pub use recordlink_files::{FileMetadata, FilesError};
pub use recordlink_token::{
    AccessPayload, IssuedToken, PatientSummaryFields, PayloadKind, RecordSummary, Rejection,
    TokenError,
};
