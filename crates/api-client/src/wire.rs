//! Request bodies and response classification for the record REST
//! surface.
//!
//! Classification is pure (status code plus body text in, outcome or
//! error out) so the status mapping is testable without a socket.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use emr_core::{ApiError, SaveOutcome};
use emr_types::{ConflictInfo, Record, RecordData};

/// Body of a plain save. `force` carries the skip-lock sentinel.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WriteBody<'a> {
    pub data: &'a RecordData,
    pub row_version: u64,
    pub client_session_id: Uuid,
    pub is_draft: bool,
    pub force: bool,
}

/// Body of a sign request. No draft or force flags; signing is always a
/// deliberate, version-checked write.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignBody<'a> {
    pub data: &'a RecordData,
    pub row_version: u64,
    pub client_session_id: Uuid,
}

/// Body of an amend request. The row version travels for the audit
/// trail, not for an optimistic-lock check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AmendBody<'a> {
    pub data: &'a RecordData,
    pub reason: &'a str,
    pub row_version: u64,
    pub client_session_id: Uuid,
}

/// Shape of the server's error payloads. Every field is optional because
/// proxies and gateways answer with their own bodies.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Maps a save or sign response onto [`SaveOutcome`].
///
/// 409 and the signed refusal become outcome values; only auth, server,
/// and decode failures remain errors.
pub(crate) fn classify_write(status: u16, body: &str) -> Result<SaveOutcome, ApiError> {
    match status {
        200..=299 => {
            let record: Record = serde_json::from_str(body)?;
            Ok(SaveOutcome::Saved(record))
        }
        409 => {
            let conflict: ConflictInfo = serde_json::from_str(body)?;
            Ok(SaveOutcome::Conflict(conflict))
        }
        400 => {
            let detail: ErrorBody = serde_json::from_str(body).unwrap_or_default();
            if detail.code.as_deref() == Some("signed") {
                Ok(SaveOutcome::AlreadySigned)
            } else {
                Err(classify_failure(status, body))
            }
        }
        _ => Err(classify_failure(status, body)),
    }
}

/// Maps a non-success status onto the [`ApiError`] flavour the engine
/// reacts to.
pub(crate) fn classify_failure(status: u16, body: &str) -> ApiError {
    match status {
        401 => ApiError::SessionExpired,
        403 => ApiError::Forbidden,
        _ => ApiError::Server {
            status,
            message: failure_message(body),
        },
    }
}

/// Best human-readable detail a failure body offers.
fn failure_message(body: &str) -> String {
    if let Ok(detail) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = detail.message.filter(|m| !m.trim().is_empty()) {
            return message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no detail in response".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emr_types::LifecycleState;
    use serde_json::json;

    fn record_body() -> String {
        json!({
            "identity": "enc-7",
            "data": {"complaints": "persistent cough"},
            "version": 3,
            "rowVersion": 3,
            "lifecycleState": "draft",
            "lastEditedBy": "dr-osei",
            "lastEditedAt": "2026-02-11T09:30:00Z"
        })
        .to_string()
    }

    #[test]
    fn write_bodies_use_camel_case_keys() {
        let data = RecordData::default();
        let body = WriteBody {
            data: &data,
            row_version: 4,
            client_session_id: Uuid::nil(),
            is_draft: true,
            force: false,
        };
        let value = serde_json::to_value(&body).expect("body should serialise");
        assert_eq!(value.get("rowVersion"), Some(&json!(4)));
        assert!(value.get("clientSessionId").is_some());
        assert_eq!(value.get("isDraft"), Some(&json!(true)));
        assert_eq!(value.get("force"), Some(&json!(false)));
    }

    #[test]
    fn a_win_comes_back_as_the_saved_record() {
        let outcome = classify_write(200, &record_body()).expect("2xx should classify");
        match outcome {
            SaveOutcome::Saved(record) => {
                assert_eq!(record.version, 3);
                assert_eq!(record.lifecycle, LifecycleState::Draft);
                assert_eq!(record.last_edited_by, "dr-osei");
            }
            other => panic!("expected Saved, got {other:?}"),
        }
    }

    #[test]
    fn a_version_race_comes_back_as_a_conflict_value() {
        let body = json!({
            "serverVersion": 5,
            "yourVersion": 3,
            "lastEditedBy": "dr-ng",
            "lastEditedAt": "2026-02-11T09:31:00Z"
        })
        .to_string();
        let outcome = classify_write(409, &body).expect("409 should classify");
        match outcome {
            SaveOutcome::Conflict(info) => {
                assert_eq!(info.server_version, 5);
                assert_eq!(info.your_version, 3);
                assert_eq!(info.last_edited_by, "dr-ng");
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn a_signed_refusal_is_an_outcome_not_an_error() {
        let body = json!({"code": "signed", "message": "record is signed"}).to_string();
        let outcome = classify_write(400, &body).expect("signed refusal should classify");
        assert!(matches!(outcome, SaveOutcome::AlreadySigned));
    }

    #[test]
    fn other_bad_requests_stay_errors() {
        let body = json!({"code": "validation", "message": "data too large"}).to_string();
        let err = classify_write(400, &body).expect_err("plain 400 should be an error");
        assert!(matches!(
            err,
            ApiError::Server { status: 400, ref message } if message == "data too large"
        ));
    }

    #[test]
    fn auth_failures_map_to_their_flavours() {
        assert!(matches!(
            classify_failure(401, ""),
            ApiError::SessionExpired
        ));
        assert!(matches!(classify_failure(403, ""), ApiError::Forbidden));
    }

    #[test]
    fn server_failures_keep_status_and_message() {
        let from_json = classify_failure(503, &json!({"message": "maintenance"}).to_string());
        assert!(matches!(
            from_json,
            ApiError::Server { status: 503, ref message } if message == "maintenance"
        ));

        let from_text = classify_failure(502, "bad gateway\n");
        assert!(matches!(
            from_text,
            ApiError::Server { status: 502, ref message } if message == "bad gateway"
        ));

        let from_empty = classify_failure(500, "  ");
        assert!(matches!(
            from_empty,
            ApiError::Server { status: 500, ref message } if message == "no detail in response"
        ));
    }

    #[test]
    fn an_unreadable_success_body_is_a_decode_error() {
        let err = classify_write(200, "<html>oops</html>").expect_err("garbage should not parse");
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn a_conflict_body_that_does_not_parse_is_a_decode_error() {
        let err = classify_write(409, "gateway timeout").expect_err("garbage should not parse");
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
