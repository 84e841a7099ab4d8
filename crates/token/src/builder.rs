//! Token issuance.
//!
//! [`TokenBuilder`] assembles a payload, stamps it with the injected clock, and encodes it:
//!
//! - Link access: standard base64 (padded) of the compact JSON, so the token survives being
//!   embedded in an access URL
//! - Data access and patient summaries: the compact JSON text itself
//!
//! The two conventions differ for compatibility with codes already in circulation, which is why
//! [`crate::decode`] tries both.

use crate::clock::{Clock, SystemClock};
use crate::locator::LocatorResolver;
use crate::payload::{
    AccessPayload, DataAccess, LinkAccess, PatientSummary, PatientSummaryFields, RecordSummary,
    PAYLOAD_VERSION,
};
use crate::render::{qr_filename, ImageRenderer, RenderError, RenderOptions};
use crate::{TokenError, TokenResult};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use futures::future::try_join_all;
use recordlink_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default cap on file references per link token.
///
/// A signed locator runs to about 190 bytes at the default public URL, so four of them plus the
/// envelope is what fits an `H`-level code once base64-encoded. Raising the cap is allowed, but
/// builds over more files fail with [`TokenError::PayloadTooLarge`] unless the locators are shorter.
pub const DEFAULT_MAX_LINK_FILES: usize = 4;

/// Longest lifetime a link token may be issued with (7 days).
pub const MAX_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Path of the client page that consumes link tokens.
pub const ACCESS_PAGE_PATH: &str = "/patient-access";

/// How the token string was framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEncoding {
    PlainJson,
    Base64Json,
}

/// Builder settings, resolved from configuration at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuilderOptions {
    /// Maximum number of file references in one link token.
    pub max_link_files: usize,
    /// Base of the access URL placed in link codes. When `None` the bare token is used.
    pub app_url: Option<String>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            max_link_files: DEFAULT_MAX_LINK_FILES,
            app_url: None,
        }
    }
}

/// Result of a successful build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub payload: AccessPayload,
    /// The encoded token.
    pub token: String,
    pub encoding: TokenEncoding,
    /// Text to place in the scannable image. Equal to `token` except for link tokens issued with
    /// an application URL.
    pub scan_text: String,
    pub render: RenderOptions,
}

impl IssuedToken {
    /// Suggested download filename for the rendered code.
    pub fn filename(&self) -> String {
        qr_filename(
            self.payload.kind(),
            self.payload.patient_id().as_str(),
            self.payload.generated_at().date_naive(),
        )
    }

    pub fn render_with(&self, renderer: &dyn ImageRenderer) -> Result<Vec<u8>, RenderError> {
        renderer.render(&self.scan_text, &self.render)
    }
}

/// Assembles and encodes access tokens.
///
/// Stateless apart from its collaborators; cheap to clone and share across requests.
#[derive(Clone)]
pub struct TokenBuilder {
    resolver: Arc<dyn LocatorResolver>,
    clock: Arc<dyn Clock>,
    options: BuilderOptions,
}

impl TokenBuilder {
    /// Creates a builder using the system clock and default options.
    pub fn new(resolver: Arc<dyn LocatorResolver>) -> Self {
        Self {
            resolver,
            clock: Arc::new(SystemClock),
            options: BuilderOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: BuilderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Builds a link-access token for `file_references`.
    ///
    /// One locator is resolved per reference, all concurrently and all with the same TTL. The
    /// gather is all-or-nothing: if any resolution fails the build aborts and no token is
    /// produced. `urls` keeps the order of `file_references`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a blank patient id, an empty or oversized reference list, or a TTL
    ///   outside `1..=MAX_TTL_SECONDS`
    /// - `UpstreamResolution` if any locator cannot be obtained
    /// - `PayloadTooLarge` if the scan text does not fit the image
    pub async fn build_link_access(
        &self,
        file_references: &[String],
        patient_id: &str,
        ttl_seconds: u64,
    ) -> TokenResult<IssuedToken> {
        let patient_id = parse_patient_id(patient_id)?;

        if file_references.is_empty() {
            return Err(TokenError::InvalidInput(
                "at least one file reference is required".into(),
            ));
        }
        if file_references.len() > self.options.max_link_files {
            return Err(TokenError::InvalidInput(format!(
                "{} file references exceed the limit of {} per token",
                file_references.len(),
                self.options.max_link_files
            )));
        }
        let ttl = ttl_duration(ttl_seconds)?;

        // Read before resolving, at whole seconds, so the token never outlives its locators.
        let generated_at = self.clock.now().trunc_subsecs(0);
        let resolutions = file_references.iter().map(|reference| async move {
            self.resolver
                .resolve(reference, ttl_seconds)
                .await
                .map_err(|source| {
                    tracing::warn!(%reference, error = %source, "locator resolution failed");
                    TokenError::UpstreamResolution {
                        reference: reference.clone(),
                        source,
                    }
                })
        });
        let urls = try_join_all(resolutions).await?;

        let payload = AccessPayload::LinkAccess(LinkAccess {
            patient_id,
            urls,
            expires_at: generated_at + ttl,
            generated_at,
        });

        let json = payload.to_json()?;
        let token = STANDARD.encode(&json);
        let scan_text = match &self.options.app_url {
            Some(app_url) => format!(
                "{}{}?token={}",
                app_url.trim_end_matches('/'),
                ACCESS_PAGE_PATH,
                URL_SAFE_NO_PAD.encode(&json)
            ),
            None => token.clone(),
        };

        self.finish(payload, token, TokenEncoding::Base64Json, scan_text)
    }

    /// Builds a data-access token with no expiry.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a blank patient id or an empty record list.
    pub fn build_data_access(
        &self,
        patient_id: &str,
        patient_name: &str,
        records: Vec<RecordSummary>,
    ) -> TokenResult<IssuedToken> {
        self.data_access(patient_id, patient_name, records, None)
    }

    /// Builds a data-access token that expires `ttl_seconds` after issuance.
    pub fn build_data_access_with_ttl(
        &self,
        patient_id: &str,
        patient_name: &str,
        records: Vec<RecordSummary>,
        ttl_seconds: u64,
    ) -> TokenResult<IssuedToken> {
        self.data_access(patient_id, patient_name, records, Some(ttl_seconds))
    }

    /// Builds a patient-summary token. Summaries never expire.
    pub fn build_patient_summary(
        &self,
        patient: PatientSummaryFields,
    ) -> TokenResult<IssuedToken> {
        let payload = AccessPayload::PatientSummary(PatientSummary {
            version: PAYLOAD_VERSION.to_owned(),
            patient,
            generated_at: self.clock.now(),
        });

        let token = payload.to_json()?;
        self.finish(payload, token.clone(), TokenEncoding::PlainJson, token)
    }

    fn data_access(
        &self,
        patient_id: &str,
        patient_name: &str,
        records: Vec<RecordSummary>,
        ttl_seconds: Option<u64>,
    ) -> TokenResult<IssuedToken> {
        let patient_id = parse_patient_id(patient_id)?;
        if records.is_empty() {
            return Err(TokenError::InvalidInput(
                "at least one record is required".into(),
            ));
        }
        let ttl = ttl_seconds.map(ttl_duration).transpose()?;

        let generated_at = self.clock.now();
        let payload = AccessPayload::DataAccess(DataAccess {
            version: PAYLOAD_VERSION.to_owned(),
            patient_id,
            patient_name: patient_name.trim().to_owned(),
            records,
            generated_at,
            expires_at: ttl.map(|ttl| generated_at + ttl),
        });

        let token = payload.to_json()?;
        self.finish(payload, token.clone(), TokenEncoding::PlainJson, token)
    }

    fn finish(
        &self,
        payload: AccessPayload,
        token: String,
        encoding: TokenEncoding,
        scan_text: String,
    ) -> TokenResult<IssuedToken> {
        let render = RenderOptions::for_kind(payload.kind());
        if scan_text.len() > render.capacity() {
            return Err(TokenError::PayloadTooLarge {
                len: scan_text.len(),
                capacity: render.capacity(),
            });
        }

        tracing::info!(
            kind = payload.kind().tag(),
            patient_id = %payload.patient_id(),
            bytes = scan_text.len(),
            "issued access token"
        );

        Ok(IssuedToken {
            payload,
            token,
            encoding,
            scan_text,
            render,
        })
    }
}

fn parse_patient_id(patient_id: &str) -> TokenResult<NonEmptyText> {
    NonEmptyText::new(patient_id)
        .map_err(|_| TokenError::InvalidInput("patient id cannot be empty".into()))
}

fn ttl_duration(ttl_seconds: u64) -> TokenResult<Duration> {
    if ttl_seconds == 0 || ttl_seconds > MAX_TTL_SECONDS {
        return Err(TokenError::InvalidInput(format!(
            "ttl must be between 1 and {MAX_TTL_SECONDS} seconds, got {ttl_seconds}"
        )));
    }
    // Bounded above, so the conversion cannot overflow.
    Ok(Duration::seconds(ttl_seconds as i64))
}

/// Convenience for callers that only need an expiry instant.
pub fn expiry_after(now: DateTime<Utc>, ttl_seconds: u64) -> TokenResult<DateTime<Utc>> {
    Ok(now + ttl_duration(ttl_seconds)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode, DecodeOutcome};
    use crate::locator::LocatorError;
    use crate::payload::PayloadKind;
    use crate::{FixedClock, TokenError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapResolver {
        locators: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl MapResolver {
        fn new(entries: &[(&str, &str)]) -> Self {
            Self {
                locators: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LocatorResolver for MapResolver {
        async fn resolve(&self, reference: &str, ttl_seconds: u64) -> Result<String, LocatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.locators
                .get(reference)
                .map(|url| format!("{url}?ttl={ttl_seconds}"))
                .ok_or_else(|| LocatorError::NotFound(reference.to_owned()))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 1, 9, 30, 0).unwrap()
    }

    fn builder(resolver: Arc<MapResolver>) -> TokenBuilder {
        TokenBuilder::new(resolver).with_clock(Arc::new(FixedClock(t0())))
    }

    fn refs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn record(title: &str) -> RecordSummary {
        RecordSummary {
            date: Utc.with_ymd_and_hms(2024, 11, 20, 0, 0, 0).unwrap(),
            record_type: "report".into(),
            title: title.into(),
            description: Some("All values within range".into()),
            file_reference: Some("medical-records/p1/report/1.pdf".into()),
        }
    }

    #[tokio::test]
    async fn link_access_worked_example() {
        let resolver = Arc::new(MapResolver::new(&[("f1", "u1"), ("f2", "u2")]));
        let issued = builder(resolver)
            .build_link_access(&refs(&["f1", "f2"]), "p1", 3600)
            .await
            .unwrap();

        let AccessPayload::LinkAccess(link) = &issued.payload else {
            panic!("expected link access");
        };
        assert_eq!(link.patient_id.as_str(), "p1");
        assert_eq!(link.urls, vec!["u1?ttl=3600", "u2?ttl=3600"]);
        assert_eq!(link.generated_at, t0());
        assert_eq!(link.expires_at, t0() + Duration::seconds(3600));
        assert_eq!(issued.encoding, TokenEncoding::Base64Json);
        assert_eq!(issued.scan_text, issued.token);

        match decode(&issued.token) {
            DecodeOutcome::Payload { payload, encoding } => {
                assert_eq!(payload, issued.payload);
                assert_eq!(encoding, TokenEncoding::Base64Json);
                assert!(!payload.is_expired_at(t0() + Duration::seconds(3600)));
                assert!(payload.is_expired_at(t0() + Duration::seconds(3601)));
            }
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn link_access_aborts_on_any_failed_resolution() {
        let resolver = Arc::new(MapResolver::new(&[("f1", "u1"), ("f3", "u3")]));
        let result = builder(resolver.clone())
            .build_link_access(&refs(&["f1", "f2", "f3"]), "p1", 3600)
            .await;

        match result {
            Err(TokenError::UpstreamResolution { reference, source }) => {
                assert_eq!(reference, "f2");
                assert_eq!(source, LocatorError::NotFound("f2".into()));
            }
            other => panic!("expected UpstreamResolution, got {other:?}"),
        }
        assert!(resolver.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn link_access_rejects_bad_input_before_resolving() {
        let resolver = Arc::new(MapResolver::new(&[("f1", "u1")]));
        let b = builder(resolver.clone());

        assert!(matches!(
            b.build_link_access(&[], "p1", 3600).await,
            Err(TokenError::InvalidInput(_))
        ));
        assert!(matches!(
            b.build_link_access(&refs(&["f1"]), "  ", 3600).await,
            Err(TokenError::InvalidInput(_))
        ));
        assert!(matches!(
            b.build_link_access(&refs(&["f1"]), "p1", 0).await,
            Err(TokenError::InvalidInput(_))
        ));
        assert!(matches!(
            b.build_link_access(&refs(&["f1"]), "p1", MAX_TTL_SECONDS + 1).await,
            Err(TokenError::InvalidInput(_))
        ));

        let too_many: Vec<String> = (0..=DEFAULT_MAX_LINK_FILES)
            .map(|i| format!("f{i}"))
            .collect();
        assert!(matches!(
            b.build_link_access(&too_many, "p1", 3600).await,
            Err(TokenError::InvalidInput(_))
        ));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn link_access_timestamps_are_whole_seconds() {
        let resolver = Arc::new(MapResolver::new(&[("f1", "u1")]));
        let issued = TokenBuilder::new(resolver)
            .with_clock(Arc::new(FixedClock(t0() + Duration::milliseconds(750))))
            .build_link_access(&refs(&["f1"]), "p1", 60)
            .await
            .unwrap();

        assert_eq!(issued.payload.generated_at(), t0());
        assert_eq!(issued.payload.expires_at(), Some(t0() + Duration::seconds(60)));
    }

    #[tokio::test]
    async fn link_access_embeds_access_url_when_configured() {
        let resolver = Arc::new(MapResolver::new(&[("f1", "https://files.example/f1")]));
        let issued = builder(resolver)
            .with_options(BuilderOptions {
                app_url: Some("https://records.example/".into()),
                ..BuilderOptions::default()
            })
            .build_link_access(&refs(&["f1"]), "p1", 600)
            .await
            .unwrap();

        assert!(issued
            .scan_text
            .starts_with("https://records.example/patient-access?token="));
        assert_ne!(issued.scan_text, issued.token);

        match decode(&issued.scan_text) {
            DecodeOutcome::Payload { payload, .. } => assert_eq!(payload, issued.payload),
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn data_access_is_plain_json_without_expiry() {
        let b = builder(Arc::new(MapResolver::new(&[])));
        let issued = b
            .build_data_access("p1", "Sarah Williams", vec![record("Blood panel")])
            .unwrap();

        assert_eq!(issued.encoding, TokenEncoding::PlainJson);
        assert!(issued.token.starts_with('{'));
        assert_eq!(issued.payload.expires_at(), None);
        assert_eq!(issued.render.error_correction, crate::ErrorCorrection::M);

        match decode(&issued.token) {
            DecodeOutcome::Payload { payload, encoding } => {
                assert_eq!(payload, issued.payload);
                assert_eq!(encoding, TokenEncoding::PlainJson);
            }
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn data_access_with_ttl_sets_expiry() {
        let b = builder(Arc::new(MapResolver::new(&[])));
        let issued = b
            .build_data_access_with_ttl("p1", "Sarah Williams", vec![record("X-ray")], 120)
            .unwrap();

        assert_eq!(
            issued.payload.expires_at(),
            Some(t0() + Duration::seconds(120))
        );
        assert!(issued.payload.has_valid_lifetime());
    }

    #[test]
    fn data_access_requires_records() {
        let b = builder(Arc::new(MapResolver::new(&[])));
        assert!(matches!(
            b.build_data_access("p1", "Sarah", vec![]),
            Err(TokenError::InvalidInput(_))
        ));
    }

    #[test]
    fn oversized_data_token_is_rejected() {
        let b = builder(Arc::new(MapResolver::new(&[])));
        let records: Vec<RecordSummary> = (0..40)
            .map(|i| record(&format!("Follow-up consultation number {i}")))
            .collect();

        match b.build_data_access("p1", "Sarah Williams", records) {
            Err(TokenError::PayloadTooLarge { len, capacity }) => assert!(len > capacity),
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn patient_summary_round_trips() {
        let b = builder(Arc::new(MapResolver::new(&[])));
        let issued = b
            .build_patient_summary(PatientSummaryFields {
                id: NonEmptyText::new("p1").unwrap(),
                name: "Sarah Williams".into(),
                date_of_birth: Some("1992-03-20".into()),
                blood_type: Some("O+".into()),
                allergies: vec!["Penicillin".into()],
                emergency_contact: Some("+44 7700 900123".into()),
                recent_diagnoses: vec!["Hypertension".into()],
                current_medications: vec!["Lisinopril 10mg".into()],
            })
            .unwrap();

        assert_eq!(issued.payload.kind(), PayloadKind::PatientSummary);
        assert_eq!(issued.filename(), "medical-qr-summary-p1-2024-12-01.png");

        match decode(&issued.token) {
            DecodeOutcome::Payload { payload, .. } => assert_eq!(payload, issued.payload),
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn render_with_passes_scan_text_and_options() {
        struct EchoRenderer;
        impl ImageRenderer for EchoRenderer {
            fn render(&self, text: &str, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
                Ok(format!("{}:{}", options.width_px, text).into_bytes())
            }
        }

        let b = builder(Arc::new(MapResolver::new(&[])));
        let issued = b.build_data_access("p1", "Sarah", vec![record("ECG")]).unwrap();
        let bytes = issued.render_with(&EchoRenderer).unwrap();

        assert_eq!(bytes, format!("500:{}", issued.scan_text).into_bytes());
    }
}
