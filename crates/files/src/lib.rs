//! Record Link File Storage
//!
//! This crate stores the files patients share and issues the time-limited locators that link
//! tokens point at. It is the object-storage collaborator behind
//! [`recordlink_token::LocatorResolver`].
//!
//! ## Design Principles
//!
//! - Files are content-addressed by SHA-256; the hash is the file reference placed in tokens
//! - Files are immutable once added (new content creates a new file)
//! - Locators are bearer URLs: an HMAC over the hash and expiry instant, no server-side state
//! - A locator stops working once its expiry passes, independent of the token that carried it
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//! └── files/
//!     └── sha256/
//!         └── ab/
//!             └── 3f/
//!                 └── ab3f9e…
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use recordlink_files::FileStore;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileStore::new(Path::new("file_store"))?;
//! let metadata = store.add_bytes("blood-panel.pdf", b"%PDF-1.7 ...")?;
//! assert!(store.contains(&metadata.hash)?);
//! # Ok(())
//! # }
//! ```

mod constants;
mod files;
mod locator;

pub use constants::{FILES_FOLDER_NAME, HASH_ALGORITHM, LOCATOR_PATH, MIN_SIGNING_KEY_LEN};
pub use files::{detect_media_type, FileMetadata, FileStore};
pub use locator::{LocatorSigner, SignedLocatorResolver};
pub use recordlink_types::Sha256Hash;

use chrono::{DateTime, Utc};

/// Errors that can occur during file and locator operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// The hash does not name a stored file
    #[error("File not found: {0}")]
    NotFound(String),

    /// File already exists in content-addressed storage (immutability violation)
    #[error("File with hash {0} already exists in storage")]
    FileAlreadyExists(String),

    /// A file reference or hash was not canonical
    #[error("Invalid hash: {0}")]
    InvalidHash(#[from] recordlink_types::TextError),

    /// Locator signing key rejected at construction
    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),

    /// Locator signature does not match its hash and expiry
    #[error("Locator signature is invalid")]
    InvalidSignature,

    /// Locator was presented after its expiry
    #[error("Locator expired at {expired_at}")]
    LocatorExpired { expired_at: DateTime<Utc> },

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
