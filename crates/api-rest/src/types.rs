//! Request and response bodies for the REST API.
//!
//! Token payloads are passed through in their wire form (camelCase, tagged by `type`), so the
//! OpenAPI document describes them as free-form objects.

use recordlink_core::{
    AccessPayload, FileMetadata, IssuedToken, PatientSummaryFields, RecordSummary, ScanReport,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use recordlink_token::{RenderOptions, TokenEncoding};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredFileRes {
    /// SHA-256 of the content; use it as a file reference when issuing link tokens.
    pub hash: String,
    pub size_bytes: u64,
    pub media_type: Option<String>,
    pub original_filename: String,
    /// RFC 3339 timestamp.
    pub stored_at: String,
}

impl From<FileMetadata> for StoredFileRes {
    fn from(metadata: FileMetadata) -> Self {
        Self {
            hash: metadata.hash.to_string(),
            size_bytes: metadata.size_bytes,
            media_type: metadata.media_type.map(|t| t.into_inner()),
            original_filename: metadata.original_filename.into_inner(),
            stored_at: metadata.stored_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssueLinkReq {
    pub patient_id: String,
    pub file_references: Vec<String>,
    /// Defaults to the server's configured link lifetime.
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssueDataReq {
    pub patient_id: String,
    #[serde(default)]
    pub patient_name: String,
    #[schema(value_type = Vec<Object>)]
    pub records: Vec<RecordSummary>,
    /// Omit for a token that never expires.
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssueSummaryReq {
    #[schema(value_type = Object)]
    pub patient: PatientSummaryFields,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssuedTokenRes {
    pub token: String,
    #[schema(value_type = String)]
    pub encoding: TokenEncoding,
    /// Text encoded in the QR image.
    pub scan_text: String,
    /// The rendered QR code as a `data:image/png;base64,` URL.
    pub image: String,
    /// Suggested download filename for `image`.
    pub filename: String,
    #[schema(value_type = Object)]
    pub payload: AccessPayload,
    #[schema(value_type = Object)]
    pub render: RenderOptions,
}

impl IssuedTokenRes {
    pub fn new(issued: IssuedToken, png: &[u8]) -> Self {
        Self {
            filename: issued.filename(),
            image: format!("data:image/png;base64,{}", STANDARD.encode(png)),
            token: issued.token,
            encoding: issued.encoding,
            scan_text: issued.scan_text,
            payload: issued.payload,
            render: issued.render,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DecodeReq {
    /// Raw text read from a scanned code.
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DecodeRes {
    /// One of `valid`, `expired`, `unrecognized`, `unreadable`.
    pub status: String,
    #[schema(value_type = Option<Object>)]
    pub payload: Option<AccessPayload>,
    #[schema(value_type = Option<String>)]
    pub encoding: Option<TokenEncoding>,
    pub expired_at: Option<String>,
    pub reason: Option<String>,
}

impl From<ScanReport> for DecodeRes {
    fn from(report: ScanReport) -> Self {
        let status = report.status().to_string();
        let empty = Self {
            status,
            payload: None,
            encoding: None,
            expired_at: None,
            reason: None,
        };

        match report {
            ScanReport::Valid { payload, encoding } => Self {
                payload: Some(payload),
                encoding: Some(encoding),
                ..empty
            },
            ScanReport::Expired {
                payload,
                expired_at,
            } => Self {
                payload: Some(payload),
                expired_at: Some(expired_at.to_rfc3339()),
                ..empty
            },
            ScanReport::Unrecognized { reason } => Self {
                reason: Some(reason.to_string()),
                ..empty
            },
            ScanReport::Unreadable => empty,
        }
    }
}
