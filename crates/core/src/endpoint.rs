//! The record endpoint: the seam between the editing engine and the wire.
//!
//! Implementations:
//! - `InMemoryRecordEndpoint` (in this crate) - shared-store reference
//!   semantics, used by tests and the demo runner
//! - `HttpRecordEndpoint` (in api-client) - the REST surface
//!
//! The trait's vocabulary already classifies outcomes, so no
//! implementation can smuggle a version conflict through as an error.

use async_trait::async_trait;
use uuid::Uuid;

use emr_types::{
    AmendmentReason, ConflictInfo, DiffReport, Record, RecordData, RecordId, RevisionHistory,
};

use crate::ApiError;

/// Payload common to save and sign: content plus the optimistic-lock
/// token and the client session marker.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub data: RecordData,
    /// The version this write is based on; the server refuses the write
    /// if the record has moved past it.
    pub row_version: u64,
    /// Identifies the writing session so the server can tell a client's
    /// own race from another actor's edit.
    pub client_session_id: Uuid,
}

/// How the server answered a save or sign.
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// The write landed; this is the authoritative record.
    Saved(Record),
    /// Someone else wrote first and the optimistic lock refused the
    /// write. Local content is untouched.
    Conflict(ConflictInfo),
    /// The record is signed. Plain saves are refused outright; the amend
    /// path is the only way to change signed content.
    AlreadySigned,
}

/// Abstract record server.
///
/// `load` treats a missing record as a value (`None`, a new document).
/// `save` and `sign` return [`SaveOutcome`] so conflicts are values too.
/// Only transport and server failures surface as [`ApiError`].
#[async_trait]
pub trait RecordEndpoint: Send + Sync {
    /// Fetch the current record, or `None` when none exists yet.
    async fn load(&self, identity: &RecordId) -> Result<Option<Record>, ApiError>;

    /// Write content against the version carried in `request`. With
    /// `force`, the skip-lock sentinel is sent and the server bypasses
    /// its version check.
    async fn save(
        &self,
        identity: &RecordId,
        request: WriteRequest,
        force: bool,
    ) -> Result<SaveOutcome, ApiError>;

    /// Write content and move the lifecycle to signed. Same conflict
    /// semantics as [`save`](RecordEndpoint::save).
    async fn sign(&self, identity: &RecordId, request: WriteRequest)
        -> Result<SaveOutcome, ApiError>;

    /// Record an amendment to a signed record. The reason is validated by
    /// construction before this can be called; on success the lifecycle
    /// becomes amended and a new revision is recorded.
    async fn amend(
        &self,
        identity: &RecordId,
        request: WriteRequest,
        reason: &AmendmentReason,
    ) -> Result<Record, ApiError>;

    /// Field-level changes between two stored versions.
    async fn diff(&self, identity: &RecordId, from: u64, to: u64) -> Result<DiffReport, ApiError>;

    /// Ordered revision metadata for the record.
    async fn history(&self, identity: &RecordId) -> Result<RevisionHistory, ApiError>;
}
