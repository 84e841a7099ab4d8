//! Constants used throughout the Record Link core crate.
//!
//! Environment variable names and their defaults live here so the server binary and the CLI
//! resolve configuration the same way.

/// REST bind address.
pub const REST_ADDR_VAR: &str = "RECORDLINK_REST_ADDR";

/// File store root directory.
pub const STORAGE_DIR_VAR: &str = "RECORDLINK_STORAGE_DIR";

/// Base of the access URL embedded in link codes.
pub const APP_URL_VAR: &str = "RECORDLINK_APP_URL";

/// Base URL of issued file locators.
pub const PUBLIC_URL_VAR: &str = "RECORDLINK_PUBLIC_URL";

/// HMAC key for locator signatures.
pub const SIGNING_KEY_VAR: &str = "RECORDLINK_SIGNING_KEY";

/// Default lifetime of link tokens, in seconds.
pub const LINK_TTL_VAR: &str = "RECORDLINK_LINK_TTL_SECS";

/// Cap on file references per link token.
pub const MAX_LINK_FILES_VAR: &str = "RECORDLINK_MAX_LINK_FILES";

pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";

/// Default directory for file storage when no explicit directory is configured.
pub const DEFAULT_STORAGE_DIR: &str = "file_store";

pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000";

/// One hour.
pub const DEFAULT_LINK_TTL_SECS: u64 = 3600;
