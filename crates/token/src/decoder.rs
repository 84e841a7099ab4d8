//! Token decoding and structural validation.
//!
//! Scanned text is untrusted and may be anything: a token from this system, an access URL, a
//! code from some other application, or noise. [`decode`] never fails hard. It tries, in order:
//!
//! 1. The text as JSON
//! 2. The text (or the `token` query parameter of an access URL) as base64 of JSON
//!
//! The first candidate that validates wins. If JSON was recovered but did not validate the
//! outcome is [`DecodeOutcome::Unrecognized`]; if no JSON could be recovered at all it is
//! [`DecodeOutcome::ParseFailure`].

use crate::builder::TokenEncoding;
use crate::payload::{AccessPayload, PayloadKind};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::engine::GeneralPurpose;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

const BASE64_ENGINES: [&GeneralPurpose; 4] =
    [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD];

/// Result of decoding scanned text.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodeOutcome {
    /// A structurally valid payload, and the framing it was found in.
    Payload {
        payload: AccessPayload,
        encoding: TokenEncoding,
    },
    /// JSON was recovered but is not a recognisable payload.
    Unrecognized { value: Value, reason: Rejection },
    /// Neither framing yielded JSON.
    ParseFailure,
}

impl DecodeOutcome {
    pub fn payload(&self) -> Option<&AccessPayload> {
        match self {
            DecodeOutcome::Payload { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// Why recovered JSON was not accepted as a payload.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("not a JSON object")]
    NotAnObject,

    #[error("no discriminator and no recognisable shape")]
    MissingDiscriminator,

    #[error("unknown discriminator {0}")]
    UnknownDiscriminator(String),

    #[error("{} requires {field}", .kind.tag())]
    MissingField {
        kind: PayloadKind,
        field: &'static str,
    },

    #[error("malformed {}: {message}", .kind.tag())]
    Malformed { kind: PayloadKind, message: String },

    #[error("expiresAt must be after generatedAt")]
    InvertedLifetime,
}

/// Decodes scanned text into a payload.
pub fn decode(input: &str) -> DecodeOutcome {
    let input = input.trim();
    let mut rejected: Option<(Value, Rejection)> = None;

    if let Ok(value) = serde_json::from_str::<Value>(input) {
        match classify(value) {
            Ok(payload) => {
                tracing::debug!(kind = payload.kind().tag(), "decoded plain JSON token");
                return DecodeOutcome::Payload {
                    payload,
                    encoding: TokenEncoding::PlainJson,
                };
            }
            Err(rejection) => rejected = Some(rejection),
        }
    }

    if let Some(value) = base64_json(input) {
        match classify(value) {
            Ok(payload) => {
                tracing::debug!(kind = payload.kind().tag(), "decoded base64 token");
                return DecodeOutcome::Payload {
                    payload,
                    encoding: TokenEncoding::Base64Json,
                };
            }
            Err(rejection) => {
                // Prefer the rejection that describes an object; a bare JSON scalar from the
                // first pass says less than a decoded object from the second.
                let keep_direct = matches!(&rejected, Some((Value::Object(_), _)));
                if !keep_direct {
                    rejected = Some(rejection);
                }
            }
        }
    }

    match rejected {
        Some((value, reason)) => {
            tracing::debug!(%reason, "scanned text is not a recognised token");
            DecodeOutcome::Unrecognized { value, reason }
        }
        None => DecodeOutcome::ParseFailure,
    }
}

/// Base64-decodes the input (or the `token` parameter of an access URL) and parses it as JSON.
fn base64_json(input: &str) -> Option<Value> {
    let encoded = access_url_token(input).unwrap_or_else(|| input.to_owned());
    if encoded.is_empty() {
        return None;
    }

    BASE64_ENGINES
        .iter()
        .find_map(|engine| engine.decode(&encoded).ok())
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
}

/// Extracts the percent-decoded `token` query parameter from an `http(s)` access URL.
fn access_url_token(input: &str) -> Option<String> {
    let url = Url::parse(input).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.query_pairs()
        .find(|(key, _)| key == "token")
        // Form decoding turns a literal `+` into a space; base64 never contains spaces.
        .map(|(_, value)| value.replace(' ', "+"))
}

fn classify(value: Value) -> Result<AccessPayload, (Value, Rejection)> {
    let (kind, tagged) = match recognise(&value) {
        Ok(recognised) => recognised,
        Err(reason) => return Err((value, reason)),
    };

    let parsed = match &tagged {
        Some(with_tag) => AccessPayload::deserialize(with_tag),
        None => AccessPayload::deserialize(&value),
    };
    let payload = match parsed {
        Ok(payload) => payload,
        Err(err) => {
            let reason = Rejection::Malformed {
                kind,
                message: err.to_string(),
            };
            return Err((value, reason));
        }
    };

    if !payload.has_valid_lifetime() {
        return Err((value, Rejection::InvertedLifetime));
    }

    Ok(payload)
}

/// Determines the payload kind and checks the fields its discriminator requires.
///
/// When the object has no `type` field the kind is inferred from its shape, and a copy with the
/// inferred tag is returned for typed decoding.
fn recognise(value: &Value) -> Result<(PayloadKind, Option<Value>), Rejection> {
    let Value::Object(object) = value else {
        return Err(Rejection::NotAnObject);
    };

    let (kind, inferred) = match object.get("type") {
        Some(Value::String(tag)) => (
            PayloadKind::from_tag(tag)
                .ok_or_else(|| Rejection::UnknownDiscriminator(tag.clone()))?,
            false,
        ),
        Some(other) => return Err(Rejection::UnknownDiscriminator(other.to_string())),
        None => (infer_kind(object).ok_or(Rejection::MissingDiscriminator)?, true),
    };

    validate_shape(kind, object)?;

    let tagged = inferred.then(|| {
        let mut object = object.clone();
        object.insert("type".into(), Value::String(kind.tag().to_owned()));
        Value::Object(object)
    });

    Ok((kind, tagged))
}

fn infer_kind(object: &Map<String, Value>) -> Option<PayloadKind> {
    if object.contains_key("urls") {
        Some(PayloadKind::LinkAccess)
    } else if object.contains_key("records") {
        Some(PayloadKind::DataAccess)
    } else if object.contains_key("patient") {
        Some(PayloadKind::PatientSummary)
    } else {
        None
    }
}

fn validate_shape(kind: PayloadKind, object: &Map<String, Value>) -> Result<(), Rejection> {
    let missing = |field| Rejection::MissingField { kind, field };

    match kind {
        PayloadKind::LinkAccess => {
            if !non_empty_string(object.get("patientId")) {
                return Err(missing("patientId"));
            }
            match object.get("urls") {
                Some(Value::Array(urls)) if !urls.is_empty() => Ok(()),
                _ => Err(missing("urls")),
            }
        }
        PayloadKind::DataAccess => {
            if !non_empty_string(object.get("patientId")) {
                return Err(missing("patientId"));
            }
            match object.get("records") {
                Some(Value::Array(_)) => Ok(()),
                _ => Err(missing("records")),
            }
        }
        PayloadKind::PatientSummary => match object.get("patient") {
            Some(Value::Object(patient)) if non_empty_string(patient.get("id")) => Ok(()),
            _ => Err(missing("patient.id")),
        },
    }
}

fn non_empty_string(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(s)) if !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{LinkAccess, LINK_ACCESS_TAG};
    use chrono::{Duration, TimeZone, Utc};
    use recordlink_types::NonEmptyText;
    use serde_json::json;

    fn link_payload() -> AccessPayload {
        let generated_at = Utc.with_ymd_and_hms(2024, 12, 1, 9, 0, 0).unwrap();
        AccessPayload::LinkAccess(LinkAccess {
            patient_id: NonEmptyText::new("p1").unwrap(),
            urls: vec!["u1".into(), "u2".into()],
            expires_at: generated_at + Duration::seconds(3600),
            generated_at,
        })
    }

    #[test]
    fn plain_text_is_a_parse_failure() {
        assert_eq!(decode("not a token"), DecodeOutcome::ParseFailure);
        assert_eq!(decode(""), DecodeOutcome::ParseFailure);
        assert_eq!(decode("{\"type\":"), DecodeOutcome::ParseFailure);
    }

    #[test]
    fn direct_json_path_is_tried_first() {
        let json = link_payload().to_json().unwrap();
        match decode(&json) {
            DecodeOutcome::Payload { payload, encoding } => {
                assert_eq!(payload, link_payload());
                assert_eq!(encoding, TokenEncoding::PlainJson);
            }
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn base64_path_accepts_both_alphabets() {
        let json = link_payload().to_json().unwrap();
        for encoded in [STANDARD.encode(&json), URL_SAFE_NO_PAD.encode(&json)] {
            match decode(&encoded) {
                DecodeOutcome::Payload { payload, encoding } => {
                    assert_eq!(payload, link_payload());
                    assert_eq!(encoding, TokenEncoding::Base64Json);
                }
                other => panic!("expected payload, got {other:?}"),
            }
        }
    }

    #[test]
    fn access_url_token_parameter_is_decoded() {
        let json = link_payload().to_json().unwrap();
        let url = format!(
            "https://records.example/patient-access?lang=en&token={}#top",
            URL_SAFE_NO_PAD.encode(&json)
        );
        assert_eq!(decode(&url).payload(), Some(&link_payload()));
    }

    #[test]
    fn access_url_token_is_percent_decoded() {
        // A run of `~` bytes always yields a `+` in standard base64.
        let generated_at = Utc.with_ymd_and_hms(2024, 12, 1, 9, 0, 0).unwrap();
        let payload = AccessPayload::LinkAccess(LinkAccess {
            patient_id: NonEmptyText::new("~~~~~~~~").unwrap(),
            urls: vec!["u1".into()],
            expires_at: generated_at + Duration::seconds(60),
            generated_at,
        });
        let token = STANDARD.encode(payload.to_json().unwrap());
        assert!(token.contains('+'));

        let escaped = token
            .replace('+', "%2B")
            .replace('/', "%2F")
            .replace('=', "%3D");
        for value in [token.as_str(), escaped.as_str()] {
            let url = format!("https://records.example/patient-access?token={value}");
            assert_eq!(decode(&url).payload(), Some(&payload), "url {url}");
        }
    }

    #[test]
    fn non_http_urls_are_not_unwrapped() {
        let json = link_payload().to_json().unwrap();
        let url = format!("ftp://records.example/?token={}", URL_SAFE_NO_PAD.encode(&json));
        assert_eq!(decode(&url), DecodeOutcome::ParseFailure);
    }

    #[test]
    fn missing_tag_falls_back_to_shape() {
        let value = json!({
            "patientId": "p1",
            "urls": ["u1", "u2"],
            "expiresAt": "2024-12-01T10:00:00Z",
            "generatedAt": "2024-12-01T09:00:00Z"
        });
        assert_eq!(decode(&value.to_string()).payload(), Some(&link_payload()));
    }

    #[test]
    fn tag_is_authoritative_over_shape() {
        // Link-shaped, but tagged as data: validated as data and missing `records`.
        let value = json!({
            "type": "MEDICAL_RECORD_DATA",
            "patientId": "p1",
            "urls": ["u1"]
        });
        match decode(&value.to_string()) {
            DecodeOutcome::Unrecognized { reason, .. } => assert_eq!(
                reason,
                Rejection::MissingField {
                    kind: PayloadKind::DataAccess,
                    field: "records"
                }
            ),
            other => panic!("expected Unrecognized, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_unrecognized_with_value() {
        let value = json!({"type": "WIFI_CONFIG", "ssid": "clinic"});
        match decode(&value.to_string()) {
            DecodeOutcome::Unrecognized { value: got, reason } => {
                assert_eq!(got, value);
                assert_eq!(reason, Rejection::UnknownDiscriminator("WIFI_CONFIG".into()));
            }
            other => panic!("expected Unrecognized, got {other:?}"),
        }
    }

    #[test]
    fn structural_checks_per_discriminator() {
        let cases = [
            (
                json!({"type": LINK_ACCESS_TAG, "patientId": "p1", "urls": []}),
                "urls",
            ),
            (
                json!({"type": LINK_ACCESS_TAG, "patientId": "", "urls": ["u1"]}),
                "patientId",
            ),
            (
                json!({"type": LINK_ACCESS_TAG, "patientId": "p1", "urls": "u1"}),
                "urls",
            ),
            (
                json!({"type": "MEDICAL_RECORD_DATA", "patientId": "p1", "records": {}}),
                "records",
            ),
            (
                json!({"type": "PATIENT_SUMMARY", "patient": {"name": "Sarah"}}),
                "patient.id",
            ),
        ];

        for (value, field) in cases {
            match decode(&value.to_string()) {
                DecodeOutcome::Unrecognized {
                    reason: Rejection::MissingField { field: got, .. },
                    ..
                } => assert_eq!(got, field),
                other => panic!("expected MissingField({field}), got {other:?}"),
            }
        }
    }

    #[test]
    fn typed_decoding_failures_are_unrecognized() {
        let value = json!({
            "type": LINK_ACCESS_TAG,
            "patientId": "p1",
            "urls": ["u1"],
            "expiresAt": "tomorrow",
            "generatedAt": "2024-12-01T09:00:00Z"
        });
        assert!(matches!(
            decode(&value.to_string()),
            DecodeOutcome::Unrecognized {
                reason: Rejection::Malformed { .. },
                ..
            }
        ));
    }

    #[test]
    fn inverted_lifetime_is_rejected() {
        let value = json!({
            "type": LINK_ACCESS_TAG,
            "patientId": "p1",
            "urls": ["u1"],
            "expiresAt": "2024-12-01T08:00:00Z",
            "generatedAt": "2024-12-01T09:00:00Z"
        });
        assert!(matches!(
            decode(&value.to_string()),
            DecodeOutcome::Unrecognized {
                reason: Rejection::InvertedLifetime,
                ..
            }
        ));
    }

    #[test]
    fn json_scalars_are_unrecognized_not_failures() {
        match decode("1234") {
            DecodeOutcome::Unrecognized { value, reason } => {
                assert_eq!(value, json!(1234));
                assert_eq!(reason, Rejection::NotAnObject);
            }
            other => panic!("expected Unrecognized, got {other:?}"),
        }
    }

    #[test]
    fn base64_of_foreign_json_is_unrecognized() {
        let encoded = STANDARD.encode(json!({"hello": "world"}).to_string());
        assert!(matches!(
            decode(&encoded),
            DecodeOutcome::Unrecognized {
                reason: Rejection::MissingDiscriminator,
                ..
            }
        ));
    }
}
