//! Access payload model.
//!
//! The payload is the decoded, typed form of an access token. On the wire it is a JSON object
//! whose `type` field names the variant:
//!
//! | variant | tag |
//! | --- | --- |
//! | [`LinkAccess`] | `MEDICAL_RECORD_ACCESS` |
//! | [`DataAccess`] | `MEDICAL_RECORD_DATA` |
//! | [`PatientSummary`] | `PATIENT_SUMMARY` |
//!
//! Field names are camelCase and every instant is an absolute UTC timestamp in RFC 3339 form.

use crate::{TokenError, TokenResult};
use chrono::{DateTime, Utc};
use recordlink_types::NonEmptyText;
use serde::{Deserialize, Serialize};

/// Wire tag for link-based access.
pub const LINK_ACCESS_TAG: &str = "MEDICAL_RECORD_ACCESS";
/// Wire tag for embedded record data.
pub const DATA_ACCESS_TAG: &str = "MEDICAL_RECORD_DATA";
/// Wire tag for a patient summary card.
pub const PATIENT_SUMMARY_TAG: &str = "PATIENT_SUMMARY";

/// Format version written into data and summary payloads.
pub const PAYLOAD_VERSION: &str = "1.0";

fn default_version() -> String {
    PAYLOAD_VERSION.to_owned()
}

/// Discriminator of an [`AccessPayload`] without its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    LinkAccess,
    DataAccess,
    PatientSummary,
}

impl PayloadKind {
    /// The wire discriminator for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            PayloadKind::LinkAccess => LINK_ACCESS_TAG,
            PayloadKind::DataAccess => DATA_ACCESS_TAG,
            PayloadKind::PatientSummary => PATIENT_SUMMARY_TAG,
        }
    }

    /// Parse a wire discriminator. Matching is exact.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            LINK_ACCESS_TAG => Some(PayloadKind::LinkAccess),
            DATA_ACCESS_TAG => Some(PayloadKind::DataAccess),
            PATIENT_SUMMARY_TAG => Some(PayloadKind::PatientSummary),
            _ => None,
        }
    }

    /// Short name used in download filenames.
    pub fn short_name(self) -> &'static str {
        match self {
            PayloadKind::LinkAccess => "link",
            PayloadKind::DataAccess => "data",
            PayloadKind::PatientSummary => "summary",
        }
    }
}

/// Typed access token payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccessPayload {
    #[serde(rename = "MEDICAL_RECORD_ACCESS")]
    LinkAccess(LinkAccess),
    #[serde(rename = "MEDICAL_RECORD_DATA")]
    DataAccess(DataAccess),
    #[serde(rename = "PATIENT_SUMMARY")]
    PatientSummary(PatientSummary),
}

/// Temporary access to stored files through time-limited locators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkAccess {
    pub patient_id: NonEmptyText,
    pub urls: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

/// Record summaries embedded directly in the token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAccess {
    #[serde(default = "default_version")]
    pub version: String,
    pub patient_id: NonEmptyText,
    #[serde(default)]
    pub patient_name: String,
    pub records: Vec<RecordSummary>,
    // Older issuers wrote `generatedDate`.
    #[serde(alias = "generatedDate")]
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// One entry of a [`DataAccess`] payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    #[serde(deserialize_with = "record_date::deserialize")]
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub record_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "fileKey", default, skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
}

/// Emergency-card style summary of a patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    #[serde(default = "default_version")]
    pub version: String,
    pub patient: PatientSummaryFields,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummaryFields {
    pub id: NonEmptyText,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allergies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_diagnoses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub current_medications: Vec<String>,
}

impl AccessPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            AccessPayload::LinkAccess(_) => PayloadKind::LinkAccess,
            AccessPayload::DataAccess(_) => PayloadKind::DataAccess,
            AccessPayload::PatientSummary(_) => PayloadKind::PatientSummary,
        }
    }

    /// The patient the token is about.
    pub fn patient_id(&self) -> &NonEmptyText {
        match self {
            AccessPayload::LinkAccess(link) => &link.patient_id,
            AccessPayload::DataAccess(data) => &data.patient_id,
            AccessPayload::PatientSummary(summary) => &summary.patient.id,
        }
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        match self {
            AccessPayload::LinkAccess(link) => link.generated_at,
            AccessPayload::DataAccess(data) => data.generated_at,
            AccessPayload::PatientSummary(summary) => summary.generated_at,
        }
    }

    /// Expiry instant, if the payload carries one. Summaries never expire.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AccessPayload::LinkAccess(link) => Some(link.expires_at),
            AccessPayload::DataAccess(data) => data.expires_at,
            AccessPayload::PatientSummary(_) => None,
        }
    }

    /// Whether the payload has expired at the current system time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the payload has expired at `now`.
    ///
    /// A payload without `expiresAt` never expires. At exactly `expiresAt` the payload is still
    /// valid; it expires once `now` is strictly later.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at(), Some(expires_at) if now > expires_at)
    }

    /// Caller-level expiry check.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Expired` if [`Self::is_expired_at`] holds.
    pub fn ensure_not_expired(&self, now: DateTime<Utc>) -> TokenResult<()> {
        match self.expires_at() {
            Some(expired_at) if now > expired_at => Err(TokenError::Expired { expired_at }),
            _ => Ok(()),
        }
    }

    /// Checks that `expiresAt`, when present, is strictly after `generatedAt`.
    pub fn has_valid_lifetime(&self) -> bool {
        self.expires_at()
            .map_or(true, |expires_at| expires_at > self.generated_at())
    }

    /// Serialise to compact JSON text.
    pub fn to_json(&self) -> TokenResult<String> {
        serde_json::to_string(self).map_err(TokenError::Serialization)
    }
}

/// Record dates may be full RFC 3339 instants or bare calendar dates (`2024-12-01`), which are
/// read as midnight UTC.
mod record_date {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(instant) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(instant.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| Utc.from_utc_datetime(&midnight))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid record date: {raw}")))
    }
}
