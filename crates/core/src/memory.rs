//! In-process record endpoint with real server semantics.
//!
//! Backs the test suites and the demo runner: optimistic version check,
//! signed-content refusal, create-on-first-save, and a full revision
//! trail per record. Handles cloned from one store share it, so two
//! sessions can genuinely race each other in a test.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use emr_types::{
    AmendmentReason, ConflictInfo, DiffReport, LifecycleState, Record, RecordData, RecordId,
    RevisionAction, RevisionEntry, RevisionHistory,
};

use crate::diff::{build_report, compute_changes};
use crate::endpoint::{RecordEndpoint, SaveOutcome, WriteRequest};
use crate::ApiError;

#[derive(Debug)]
struct StoredRevision {
    entry: RevisionEntry,
    data: RecordData,
}

#[derive(Debug)]
struct StoredRecord {
    record: Record,
    revisions: Vec<StoredRevision>,
    /// Session that made the last write, kept for audit. The version
    /// check never relaxes because of it.
    last_writer: Uuid,
}

/// Shared-store endpoint. Clone (or use [`handle_for`]) to give another
/// session or another actor a handle onto the same records.
///
/// [`handle_for`]: InMemoryRecordEndpoint::handle_for
#[derive(Clone)]
pub struct InMemoryRecordEndpoint {
    store: Arc<Mutex<HashMap<RecordId, StoredRecord>>>,
    actor: String,
}

impl InMemoryRecordEndpoint {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            actor: actor.into(),
        }
    }

    /// A handle onto the same store, writing as a different actor.
    pub fn handle_for(&self, actor: impl Into<String>) -> Self {
        Self {
            store: Arc::clone(&self.store),
            actor: actor.into(),
        }
    }

    fn store(&self) -> MutexGuard<'_, HashMap<RecordId, StoredRecord>> {
        self.store.lock().expect("record store mutex poisoned")
    }

    fn write(
        &self,
        identity: &RecordId,
        request: WriteRequest,
        force: bool,
        action: RevisionAction,
        summary: Option<String>,
    ) -> SaveOutcome {
        let mut store = self.store();
        match store.get_mut(identity) {
            None => {
                // First successful save creates the record at version 1.
                let record = Record {
                    identity: identity.clone(),
                    data: request.data,
                    version: 1,
                    row_version: 1,
                    lifecycle: match action {
                        RevisionAction::Signed => LifecycleState::Signed,
                        _ => LifecycleState::Draft,
                    },
                    last_edited_by: self.actor.clone(),
                    last_edited_at: Utc::now(),
                };
                let entry = RevisionEntry {
                    version: 1,
                    actor: self.actor.clone(),
                    at: record.last_edited_at,
                    action: match action {
                        RevisionAction::Signed => RevisionAction::Signed,
                        _ => RevisionAction::Created,
                    },
                    summary,
                };
                store.insert(
                    identity.clone(),
                    StoredRecord {
                        revisions: vec![StoredRevision {
                            entry,
                            data: record.data.clone(),
                        }],
                        last_writer: request.client_session_id,
                        record: record.clone(),
                    },
                );
                SaveOutcome::Saved(record)
            }
            Some(stored) => {
                if stored.record.lifecycle.is_signed_or_later()
                    && matches!(action, RevisionAction::Updated | RevisionAction::Signed)
                {
                    return SaveOutcome::AlreadySigned;
                }
                if !force && request.row_version != stored.record.version {
                    return SaveOutcome::Conflict(ConflictInfo {
                        server_version: stored.record.version,
                        your_version: request.row_version,
                        last_edited_by: stored.record.last_edited_by.clone(),
                        last_edited_at: stored.record.last_edited_at,
                    });
                }

                stored.record.version += 1;
                stored.record.row_version = stored.record.version;
                stored.record.data = request.data;
                if action == RevisionAction::Signed {
                    stored.record.lifecycle = LifecycleState::Signed;
                } else if action == RevisionAction::Amended {
                    stored.record.lifecycle = LifecycleState::Amended;
                }
                stored.record.last_edited_by = self.actor.clone();
                stored.record.last_edited_at = Utc::now();
                stored.last_writer = request.client_session_id;
                stored.revisions.push(StoredRevision {
                    entry: RevisionEntry {
                        version: stored.record.version,
                        actor: self.actor.clone(),
                        at: stored.record.last_edited_at,
                        action,
                        summary,
                    },
                    data: stored.record.data.clone(),
                });
                SaveOutcome::Saved(stored.record.clone())
            }
        }
    }

    fn revision_data(&self, identity: &RecordId, version: u64) -> Result<RecordData, ApiError> {
        let store = self.store();
        let stored = store.get(identity).ok_or_else(|| ApiError::Server {
            status: 404,
            message: format!("no record for {identity}"),
        })?;
        stored
            .revisions
            .iter()
            .find(|r| r.entry.version == version)
            .map(|r| r.data.clone())
            .ok_or_else(|| ApiError::Server {
                status: 404,
                message: format!("no revision v{version} for {identity}"),
            })
    }
}

#[async_trait]
impl RecordEndpoint for InMemoryRecordEndpoint {
    async fn load(&self, identity: &RecordId) -> Result<Option<Record>, ApiError> {
        Ok(self.store().get(identity).map(|s| s.record.clone()))
    }

    async fn save(
        &self,
        identity: &RecordId,
        request: WriteRequest,
        force: bool,
    ) -> Result<SaveOutcome, ApiError> {
        Ok(self.write(identity, request, force, RevisionAction::Updated, None))
    }

    async fn sign(
        &self,
        identity: &RecordId,
        request: WriteRequest,
    ) -> Result<SaveOutcome, ApiError> {
        Ok(self.write(identity, request, false, RevisionAction::Signed, None))
    }

    async fn amend(
        &self,
        identity: &RecordId,
        request: WriteRequest,
        reason: &AmendmentReason,
    ) -> Result<Record, ApiError> {
        let mut store = self.store();
        let stored = store.get_mut(identity).ok_or_else(|| ApiError::Server {
            status: 404,
            message: format!("no record for {identity}"),
        })?;
        if !stored.record.lifecycle.is_signed_or_later() {
            return Err(ApiError::Server {
                status: 400,
                message: "record is not signed; nothing to amend".to_owned(),
            });
        }

        // No version check on amend: the row_version travels for audit
        // only, matching the endpoint contract.
        stored.record.version += 1;
        stored.record.row_version = stored.record.version;
        stored.record.data = request.data;
        stored.record.lifecycle = LifecycleState::Amended;
        stored.record.last_edited_by = self.actor.clone();
        stored.record.last_edited_at = Utc::now();
        stored.last_writer = request.client_session_id;
        stored.revisions.push(StoredRevision {
            entry: RevisionEntry {
                version: stored.record.version,
                actor: self.actor.clone(),
                at: stored.record.last_edited_at,
                action: RevisionAction::Amended,
                summary: Some(reason.as_str().to_owned()),
            },
            data: stored.record.data.clone(),
        });
        Ok(stored.record.clone())
    }

    async fn diff(&self, identity: &RecordId, from: u64, to: u64) -> Result<DiffReport, ApiError> {
        let before = self.revision_data(identity, from)?;
        let after = self.revision_data(identity, to)?;
        Ok(build_report(from, to, compute_changes(&before, &after)))
    }

    async fn history(&self, identity: &RecordId) -> Result<RevisionHistory, ApiError> {
        let store = self.store();
        let stored = store.get(identity).ok_or_else(|| ApiError::Server {
            status: 404,
            message: format!("no record for {identity}"),
        })?;
        Ok(RevisionHistory {
            revisions: stored.revisions.iter().map(|r| r.entry.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> RecordId {
        RecordId::new("enc-77").expect("valid identity")
    }

    fn content(diagnosis: &str) -> RecordData {
        let mut data = RecordData::new();
        data.set("diagnosis", json!(diagnosis));
        data
    }

    fn write_request(data: RecordData, row_version: u64) -> WriteRequest {
        WriteRequest {
            data,
            row_version,
            client_session_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn first_save_creates_the_record_at_version_one() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let outcome = endpoint
            .save(&identity(), write_request(content("flu"), 0), false)
            .await
            .expect("save should not fail transport-wise");

        let SaveOutcome::Saved(record) = outcome else {
            panic!("expected a created record");
        };
        assert_eq!(record.version, 1);
        assert_eq!(record.row_version, 1);
        assert_eq!(record.lifecycle, LifecycleState::Draft);
        assert_eq!(record.last_edited_by, "dr-osei");
    }

    #[tokio::test]
    async fn each_successful_save_increments_the_version_by_one() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let id = identity();
        endpoint
            .save(&id, write_request(content("flu"), 0), false)
            .await
            .expect("create");
        let outcome = endpoint
            .save(&id, write_request(content("influenza A"), 1), false)
            .await
            .expect("update");

        let SaveOutcome::Saved(record) = outcome else {
            panic!("expected a saved record");
        };
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn stale_row_version_comes_back_as_a_conflict_value() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let other = endpoint.handle_for("dr-ng");
        let id = identity();

        endpoint
            .save(&id, write_request(content("flu"), 0), false)
            .await
            .expect("create");
        endpoint
            .save(&id, write_request(content("influenza A"), 1), false)
            .await
            .expect("update to v2");

        let outcome = other
            .save(&id, write_request(content("cold"), 1), false)
            .await
            .expect("conflict is a value, not an error");
        let SaveOutcome::Conflict(info) = outcome else {
            panic!("expected a conflict descriptor");
        };
        assert_eq!(info.server_version, 2);
        assert_eq!(info.your_version, 1);
        assert_eq!(info.last_edited_by, "dr-osei");

        let server = endpoint.load(&id).await.expect("load").expect("record exists");
        assert_eq!(
            server.data.get("diagnosis"),
            Some(&json!("influenza A")),
            "the losing write must not touch the stored record"
        );
    }

    #[tokio::test]
    async fn force_bypasses_the_version_check() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let id = identity();
        endpoint
            .save(&id, write_request(content("flu"), 0), false)
            .await
            .expect("create");
        endpoint
            .save(&id, write_request(content("influenza A"), 1), false)
            .await
            .expect("update to v2");

        let outcome = endpoint
            .save(&id, write_request(content("cold"), 1), true)
            .await
            .expect("forced save");
        let SaveOutcome::Saved(record) = outcome else {
            panic!("force should land despite the stale token");
        };
        assert_eq!(record.version, 3);
        assert_eq!(record.data.get("diagnosis"), Some(&json!("cold")));
    }

    #[tokio::test]
    async fn signed_records_refuse_plain_saves_even_forced() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let id = identity();
        endpoint
            .save(&id, write_request(content("flu"), 0), false)
            .await
            .expect("create");
        endpoint
            .sign(&id, write_request(content("flu"), 1))
            .await
            .expect("sign");

        let outcome = endpoint
            .save(&id, write_request(content("cold"), 2), false)
            .await
            .expect("refusal is a value");
        assert!(matches!(outcome, SaveOutcome::AlreadySigned));

        let forced = endpoint
            .save(&id, write_request(content("cold"), 2), true)
            .await
            .expect("refusal is a value");
        assert!(
            matches!(forced, SaveOutcome::AlreadySigned),
            "force skips the version check, not the signature"
        );
    }

    #[tokio::test]
    async fn sign_then_amend_walks_the_lifecycle_forward() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let id = identity();
        endpoint
            .save(&id, write_request(content("flu"), 0), false)
            .await
            .expect("create");

        let signed = endpoint
            .sign(&id, write_request(content("flu"), 1))
            .await
            .expect("sign");
        let SaveOutcome::Saved(record) = signed else {
            panic!("expected the signed record");
        };
        assert_eq!(record.lifecycle, LifecycleState::Signed);
        assert_eq!(record.version, 2);

        let reason =
            AmendmentReason::new("lab result arrived after signature").expect("valid reason");
        let amended = endpoint
            .amend(&id, write_request(content("influenza A"), 2), &reason)
            .await
            .expect("amend");
        assert_eq!(amended.lifecycle, LifecycleState::Amended);
        assert_eq!(amended.version, 3);
    }

    #[tokio::test]
    async fn amending_an_unsigned_record_is_refused() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let id = identity();
        endpoint
            .save(&id, write_request(content("flu"), 0), false)
            .await
            .expect("create");

        let reason = AmendmentReason::new("should never be accepted").expect("valid reason");
        let err = endpoint
            .amend(&id, write_request(content("cold"), 1), &reason)
            .await
            .expect_err("drafts cannot be amended");
        assert!(matches!(err, ApiError::Server { status: 400, .. }));
    }

    #[tokio::test]
    async fn history_lists_actions_in_order_with_amendment_reasons() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let id = identity();
        endpoint
            .save(&id, write_request(content("flu"), 0), false)
            .await
            .expect("create");
        endpoint
            .save(&id, write_request(content("influenza A"), 1), false)
            .await
            .expect("update");
        endpoint
            .sign(&id, write_request(content("influenza A"), 2))
            .await
            .expect("sign");
        let reason = AmendmentReason::new("pharmacy flagged an interaction").expect("valid reason");
        endpoint
            .amend(&id, write_request(content("influenza A, amantadine stopped"), 3), &reason)
            .await
            .expect("amend");

        let history = endpoint.history(&id).await.expect("history");
        let actions: Vec<RevisionAction> =
            history.revisions.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![
                RevisionAction::Created,
                RevisionAction::Updated,
                RevisionAction::Signed,
                RevisionAction::Amended,
            ]
        );
        assert_eq!(
            history.revisions[3].summary.as_deref(),
            Some("pharmacy flagged an interaction")
        );
        let versions: Vec<u64> = history.revisions.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn diff_reads_from_stored_revision_snapshots() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let id = identity();
        endpoint
            .save(&id, write_request(content("flu"), 0), false)
            .await
            .expect("create");
        endpoint
            .save(&id, write_request(content("influenza A"), 1), false)
            .await
            .expect("update");

        let report = endpoint.diff(&id, 1, 2).await.expect("diff");
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].field, "diagnosis");
        assert_eq!(report.changes[0].old_value.as_deref(), Some("flu"));
        assert_eq!(report.changes[0].new_value.as_deref(), Some("influenza A"));

        let err = endpoint.diff(&id, 1, 9).await.expect_err("unknown revision");
        assert!(matches!(err, ApiError::Server { status: 404, .. }));
    }

    #[tokio::test]
    async fn loading_a_missing_record_is_none_not_an_error() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let loaded = endpoint.load(&identity()).await.expect("load");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn history_for_a_missing_record_is_not_found() {
        let endpoint = InMemoryRecordEndpoint::new("dr-osei");
        let err = endpoint
            .history(&identity())
            .await
            .expect_err("only load treats a missing record as a value");
        assert!(matches!(err, ApiError::Server { status: 404, .. }));
    }
}
