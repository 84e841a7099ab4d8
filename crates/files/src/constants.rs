//! Storage layout constants.

/// Directory under the store root holding content-addressed files.
pub const FILES_FOLDER_NAME: &str = "files";

/// Hash algorithm used for content addressing; also the next path segment.
pub const HASH_ALGORITHM: &str = "sha256";

/// Shortest accepted locator signing key, in bytes.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Route prefix under which locators are served.
pub const LOCATOR_PATH: &str = "/files";
