//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Environment variables are never read during request handling;
//! binaries call [`CoreConfig::from_lookup`] with `std::env::var` and tests pass a closure over
//! a fixed map.

use crate::constants::{
    APP_URL_VAR, DEFAULT_LINK_TTL_SECS, DEFAULT_PUBLIC_URL, DEFAULT_STORAGE_DIR, LINK_TTL_VAR,
    MAX_LINK_FILES_VAR, PUBLIC_URL_VAR, SIGNING_KEY_VAR, STORAGE_DIR_VAR,
};
use crate::{CoreError, CoreResult};
use recordlink_files::MIN_SIGNING_KEY_LEN;
use recordlink_token::builder::{DEFAULT_MAX_LINK_FILES, MAX_TTL_SECONDS};
use recordlink_token::BuilderOptions;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Core configuration resolved at startup.
#[derive(Clone)]
pub struct CoreConfig {
    storage_dir: PathBuf,
    public_url: String,
    app_url: Option<String>,
    signing_key: Vec<u8>,
    link_ttl_seconds: u64,
    max_link_files: usize,
}

// Hand-written so the signing key never reaches a log line.
impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("storage_dir", &self.storage_dir)
            .field("public_url", &self.public_url)
            .field("app_url", &self.app_url)
            .field("signing_key", &"<redacted>")
            .field("link_ttl_seconds", &self.link_ttl_seconds)
            .field("max_link_files", &self.max_link_files)
            .finish()
    }
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// `CoreError::InvalidInput` if a URL is not http(s), the signing key is too short, the TTL
    /// is outside `1..=MAX_TTL_SECONDS`, or `max_link_files` is zero.
    pub fn new(
        storage_dir: PathBuf,
        public_url: String,
        app_url: Option<String>,
        signing_key: Vec<u8>,
        link_ttl_seconds: u64,
        max_link_files: usize,
    ) -> CoreResult<Self> {
        let public_url = normalise_url(PUBLIC_URL_VAR, &public_url)?;
        let app_url = app_url
            .map(|url| normalise_url(APP_URL_VAR, &url))
            .transpose()?;

        if signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(CoreError::InvalidInput(format!(
                "{SIGNING_KEY_VAR} must be at least {MIN_SIGNING_KEY_LEN} bytes"
            )));
        }
        if link_ttl_seconds == 0 || link_ttl_seconds > MAX_TTL_SECONDS {
            return Err(CoreError::InvalidInput(format!(
                "{LINK_TTL_VAR} must be between 1 and {MAX_TTL_SECONDS}"
            )));
        }
        if max_link_files == 0 {
            return Err(CoreError::InvalidInput(format!(
                "{MAX_LINK_FILES_VAR} must be at least 1"
            )));
        }
        if max_link_files > DEFAULT_MAX_LINK_FILES {
            tracing::warn!(
                max_link_files,
                "link tokens over more than {DEFAULT_MAX_LINK_FILES} files may not fit a scannable image"
            );
        }

        Ok(Self {
            storage_dir,
            public_url,
            app_url,
            signing_key,
            link_ttl_seconds,
            max_link_files,
        })
    }

    /// Resolve configuration through `lookup`, applying defaults for unset variables.
    ///
    /// Blank values count as unset. `RECORDLINK_SIGNING_KEY` has no default.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let storage_dir = get(STORAGE_DIR_VAR).unwrap_or_else(|| DEFAULT_STORAGE_DIR.into());
        let public_url = get(PUBLIC_URL_VAR).unwrap_or_else(|| DEFAULT_PUBLIC_URL.into());
        let signing_key = get(SIGNING_KEY_VAR)
            .ok_or_else(|| CoreError::InvalidInput(format!("{SIGNING_KEY_VAR} is required")))?;
        let link_ttl_seconds = parse_number(LINK_TTL_VAR, get(LINK_TTL_VAR))?
            .unwrap_or(DEFAULT_LINK_TTL_SECS);
        let max_link_files = parse_number(MAX_LINK_FILES_VAR, get(MAX_LINK_FILES_VAR))?
            .unwrap_or(DEFAULT_MAX_LINK_FILES);

        Self::new(
            PathBuf::from(storage_dir),
            public_url,
            get(APP_URL_VAR),
            signing_key.into_bytes(),
            link_ttl_seconds,
            max_link_files,
        )
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    pub fn app_url(&self) -> Option<&str> {
        self.app_url.as_deref()
    }

    pub fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    pub fn link_ttl_seconds(&self) -> u64 {
        self.link_ttl_seconds
    }

    pub fn max_link_files(&self) -> usize {
        self.max_link_files
    }

    pub fn builder_options(&self) -> BuilderOptions {
        BuilderOptions {
            max_link_files: self.max_link_files,
            app_url: self.app_url.clone(),
        }
    }
}

fn normalise_url(name: &str, value: &str) -> CoreResult<String> {
    let value = value.trim().trim_end_matches('/');
    let invalid = || CoreError::InvalidInput(format!("{name} must be an http(s) URL, got {value:?}"));

    let url = Url::parse(value).map_err(|_| invalid())?;
    let usable = matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some_and(|host| !host.is_empty())
        && url.query().is_none()
        && url.fragment().is_none();
    if !usable {
        return Err(invalid());
    }
    Ok(value.to_string())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: Option<String>) -> CoreResult<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| CoreError::InvalidInput(format!("{name} must be a number, got {v:?}")))
        })
        .transpose()
}
