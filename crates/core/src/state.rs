//! The document state store: single source of truth for the working copy.
//!
//! Pure state-transition logic with no I/O. Every mutation goes through
//! one of the closed set of transition methods below, each total over its
//! inputs, so the undo/redo snapshotting and the dirty bookkeeping can be
//! tested without mocking anything.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use emr_types::{ConflictInfo, LifecycleState, Record, RecordData};

/// Where the session currently is, for the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Loading,
    Saving,
    Conflict,
    Error,
}

/// Client-side session state wrapping exactly one record at a time.
///
/// `history` holds prior `data` snapshots newest-last; `future` holds
/// redo snapshots newest-first. Both are full deep copies bounded by the
/// cap, with the oldest evicted. The saved baseline is kept alongside so
/// the dirty flag is always "differs from the last successful save".
#[derive(Debug)]
pub struct SessionState {
    data: RecordData,
    baseline: RecordData,
    history: VecDeque<RecordData>,
    future: VecDeque<RecordData>,
    history_cap: usize,
    status: SessionStatus,
    dirty: bool,
    error: Option<String>,
    conflict: Option<ConflictInfo>,
    version: u64,
    row_version: u64,
    lifecycle: LifecycleState,
    last_saved: Option<DateTime<Utc>>,
    last_edited_by: Option<String>,
    last_edited_at: Option<DateTime<Utc>>,
    client_session_id: Uuid,
}

impl SessionState {
    /// Creates session state at the new-document defaults. A zero
    /// `history_cap` keeps no snapshots, disabling undo outright.
    ///
    /// The client session id is generated here, once, and survives loads;
    /// it identifies this editing session to the server for as long as
    /// the session object lives.
    pub fn new(history_cap: usize) -> Self {
        Self {
            data: RecordData::new(),
            baseline: RecordData::new(),
            history: VecDeque::new(),
            future: VecDeque::new(),
            history_cap,
            status: SessionStatus::Idle,
            dirty: false,
            error: None,
            conflict: None,
            version: 1,
            row_version: 0,
            lifecycle: LifecycleState::Draft,
            last_saved: None,
            last_edited_by: None,
            last_edited_at: None,
            client_session_id: Uuid::new_v4(),
        }
    }

    // --- transitions -----------------------------------------------------

    /// Replaces the state wholesale from a loaded record.
    ///
    /// Resets history, future, the dirty flag, any conflict, and any
    /// stale error. The record's data becomes both the working copy and
    /// the saved baseline.
    pub fn load(&mut self, record: &Record) {
        self.data = record.data.clone();
        self.baseline = record.data.clone();
        self.history.clear();
        self.future.clear();
        self.status = SessionStatus::Idle;
        self.dirty = false;
        self.error = None;
        self.conflict = None;
        self.version = record.version;
        self.row_version = record.row_version;
        self.lifecycle = record.lifecycle;
        self.last_saved = None;
        self.last_edited_by = Some(record.last_edited_by.clone());
        self.last_edited_at = Some(record.last_edited_at);
    }

    /// No record exists yet: reset to the new-document defaults,
    /// `(version, row_version) = (1, 0)`, draft, empty content.
    pub fn load_new(&mut self) {
        self.data = RecordData::new();
        self.baseline = RecordData::new();
        self.history.clear();
        self.future.clear();
        self.status = SessionStatus::Idle;
        self.dirty = false;
        self.error = None;
        self.conflict = None;
        self.version = 1;
        self.row_version = 0;
        self.lifecycle = LifecycleState::Draft;
        self.last_saved = None;
        self.last_edited_by = None;
        self.last_edited_at = None;
    }

    /// A load has been issued.
    pub fn begin_loading(&mut self) {
        self.status = SessionStatus::Loading;
    }

    /// A load failed; the working copy is left as it was.
    pub fn load_error(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Error;
        self.error = Some(message.into());
    }

    /// Applies one field edit.
    ///
    /// A structurally equal value is a no-op so idle cursor movement and
    /// re-renders cause no dirty or history churn. Otherwise the current
    /// working copy is snapshotted onto the undo stack (evicting the
    /// oldest beyond the cap), the redo stack is cleared, and any stale
    /// error from a previous attempt is dropped.
    ///
    /// Returns whether anything changed.
    pub fn set_field(&mut self, field: &str, value: Value) -> bool {
        if self.data.get(field) == Some(&value) {
            return false;
        }
        self.snapshot_before_edit();
        self.data.set(field, value);
        self.after_edit();
        true
    }

    /// Applies one edit at a dotted path, with the same semantics as
    /// [`set_field`](SessionState::set_field).
    pub fn set_nested_field(&mut self, path: &str, value: Value) -> bool {
        if self.data.get_path(path) == Some(&value) {
            return false;
        }
        self.snapshot_before_edit();
        self.data.set_path(path, value);
        self.after_edit();
        true
    }

    /// Steps the working copy back one snapshot. No-op when there is
    /// nothing to undo.
    ///
    /// The dirty flag is recomputed against the saved baseline: undoing
    /// back to exactly the last-saved content makes the session clean
    /// again, which also releases the navigation guard and cancels any
    /// pending autosave.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.history.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.data, previous);
        self.future.push_front(current);
        if self.future.len() > self.history_cap {
            self.future.pop_back();
        }
        self.recompute_dirty();
        true
    }

    /// Steps the working copy forward one snapshot. No-op when there is
    /// nothing to redo.
    pub fn redo(&mut self) -> bool {
        let Some(next) = self.future.pop_front() else {
            return false;
        };
        let current = std::mem::replace(&mut self.data, next);
        self.history.push_back(current);
        if self.history.len() > self.history_cap {
            self.history.pop_front();
        }
        self.recompute_dirty();
        true
    }

    /// A write has been issued.
    pub fn save_start(&mut self) {
        self.status = SessionStatus::Saving;
    }

    /// A write succeeded; adopt the authoritative record.
    ///
    /// Clears the dirty flag and any conflict, re-baselines the saved
    /// snapshot to the current working copy (the server echoes what was
    /// written), and stamps `last_saved`. Version and lifecycle adoption
    /// is guarded: the server can never move this session backwards.
    pub fn save_success(&mut self, record: &Record) {
        self.status = SessionStatus::Idle;
        self.dirty = false;
        self.error = None;
        self.conflict = None;
        self.adopt_counters(record);
        self.baseline = self.data.clone();
        self.last_saved = Some(Utc::now());
        self.last_edited_by = Some(record.last_edited_by.clone());
        self.last_edited_at = Some(record.last_edited_at);
    }

    /// A write failed outright (transport or server trouble).
    pub fn save_error(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Error;
        self.error = Some(message.into());
    }

    /// The server refused the write over a version mismatch.
    ///
    /// Local edits are preserved untouched for the compare step; only the
    /// status and the descriptor move.
    pub fn conflict_detected(&mut self, info: ConflictInfo) {
        self.status = SessionStatus::Conflict;
        self.error = None;
        self.conflict = Some(info);
    }

    /// The conflict has been dealt with.
    ///
    /// With `refresh`, the server's current record replaces the working
    /// copy (the reload resolution): content, counters, and lifecycle are
    /// adopted, the session is clean, and the undo/redo stacks are wiped
    /// unconditionally. Without it, only the conflict and status clear.
    pub fn conflict_resolved(&mut self, refresh: Option<&Record>) {
        self.conflict = None;
        self.status = SessionStatus::Idle;
        if let Some(record) = refresh {
            self.data = record.data.clone();
            self.baseline = record.data.clone();
            self.history.clear();
            self.future.clear();
            self.dirty = false;
            self.error = None;
            self.adopt_counters(record);
            self.last_edited_by = Some(record.last_edited_by.clone());
            self.last_edited_at = Some(record.last_edited_at);
        }
    }

    /// The server reported the record signed while this session still
    /// thought it a draft. Monotone: an amended record stays amended.
    pub fn mark_signed(&mut self) {
        if !self.lifecycle.is_at_least(LifecycleState::Signed) {
            self.lifecycle = LifecycleState::Signed;
        }
    }

    fn snapshot_before_edit(&mut self) {
        self.history.push_back(self.data.clone());
        if self.history.len() > self.history_cap {
            self.history.pop_front();
        }
        self.future.clear();
    }

    fn after_edit(&mut self) {
        self.dirty = true;
        self.error = None;
        if self.status == SessionStatus::Error {
            self.status = SessionStatus::Idle;
        }
    }

    fn recompute_dirty(&mut self) {
        self.dirty = self.data != self.baseline;
    }

    fn adopt_counters(&mut self, record: &Record) {
        if record.version < self.version {
            tracing::warn!(
                server_version = record.version,
                local_version = self.version,
                "server returned a lower version than this session holds; keeping local counters"
            );
        } else {
            self.version = record.version;
            self.row_version = record.row_version;
        }
        if record.lifecycle.is_at_least(self.lifecycle) {
            self.lifecycle = record.lifecycle;
        } else {
            tracing::warn!(
                server_lifecycle = %record.lifecycle,
                local_lifecycle = %self.lifecycle,
                "server returned an earlier lifecycle state; keeping local"
            );
        }
    }

    // --- accessors -------------------------------------------------------

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        self.conflict.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn row_version(&self) -> u64 {
        self.row_version
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.last_saved
    }

    pub fn last_edited_by(&self) -> Option<&str> {
        self.last_edited_by.as_deref()
    }

    pub fn last_edited_at(&self) -> Option<DateTime<Utc>> {
        self.last_edited_at
    }

    pub fn client_session_id(&self) -> Uuid {
        self.client_session_id
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Current undo depth, for the history indicator.
    pub fn history_depth(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emr_types::RecordId;
    use serde_json::json;

    fn record_at(version: u64) -> Record {
        let mut data = RecordData::new();
        data.set("complaints", json!("headache"));
        Record {
            identity: RecordId::new("enc-1").expect("valid identity"),
            data,
            version,
            row_version: version,
            lifecycle: LifecycleState::Draft,
            last_edited_by: "dr-osei".to_owned(),
            last_edited_at: Utc::now(),
        }
    }

    fn conflict_at(server: u64, yours: u64) -> ConflictInfo {
        ConflictInfo {
            server_version: server,
            your_version: yours,
            last_edited_by: "dr-ng".to_owned(),
            last_edited_at: Utc::now(),
        }
    }

    #[test]
    fn new_state_uses_new_document_defaults() {
        let state = SessionState::new(50);
        assert_eq!(state.version(), 1);
        assert_eq!(state.row_version(), 0);
        assert_eq!(state.lifecycle(), LifecycleState::Draft);
        assert!(!state.is_dirty());
        assert!(state.data().is_empty());
    }

    #[test]
    fn set_field_marks_dirty_and_pushes_history() {
        let mut state = SessionState::new(50);
        assert!(state.set_field("diagnosis", json!("flu")));
        assert!(state.is_dirty());
        assert!(state.can_undo());
        assert!(!state.can_redo());
        assert_eq!(state.data().get("diagnosis"), Some(&json!("flu")));
    }

    #[test]
    fn set_field_with_equal_value_is_a_no_op() {
        let mut state = SessionState::new(50);
        state.set_field("diagnosis", json!("flu"));
        let depth = state.history_depth();
        assert!(!state.set_field("diagnosis", json!("flu")));
        assert_eq!(state.history_depth(), depth, "no snapshot for an equal value");
    }

    #[test]
    fn dirty_stays_set_across_any_edit_sequence_until_a_save_boundary() {
        let mut state = SessionState::new(50);
        state.load(&record_at(1));
        state.set_field("notes", json!("a"));
        state.set_field("notes", json!("b"));
        state.set_field("exam", json!("clear"));
        assert!(state.is_dirty());
        state.save_success(&record_at(2));
        assert!(!state.is_dirty());
    }

    #[test]
    fn undo_then_redo_round_trips_exactly() {
        let mut state = SessionState::new(50);
        state.set_field("complaints", json!("cough"));
        state.set_field("history", json!("smoker"));
        state.set_field("diagnosis", json!("bronchitis"));
        let final_data = state.data().clone();

        assert!(state.undo());
        assert!(state.undo());
        assert!(state.undo());
        assert!(state.data().is_empty());
        assert!(!state.undo(), "history exhausted");

        assert!(state.redo());
        assert!(state.redo());
        assert!(state.redo());
        assert_eq!(state.data(), &final_data);
        assert!(!state.redo(), "future exhausted");
    }

    #[test]
    fn new_edit_after_undo_clears_the_redo_stack() {
        let mut state = SessionState::new(50);
        state.set_field("notes", json!("first"));
        state.set_field("notes", json!("second"));
        state.undo();
        assert!(state.can_redo());
        state.set_field("notes", json!("diverged"));
        assert!(!state.can_redo(), "no stale redo after diverging");
    }

    #[test]
    fn history_cap_evicts_the_oldest_snapshot() {
        let mut state = SessionState::new(50);
        for i in 0..52 {
            state.set_field("notes", json!(format!("edit {i}")));
        }
        assert_eq!(state.history_depth(), 50);
        while state.undo() {}
        // Snapshots of the two earliest states were evicted, so the walk
        // back stops at the state holding "edit 1".
        assert_eq!(state.data().get("notes"), Some(&json!("edit 1")));
    }

    #[test]
    fn a_zero_history_cap_keeps_no_snapshots_at_all() {
        let mut state = SessionState::new(0);
        assert!(state.set_field("complaints", json!("headache")));
        assert!(state.set_field("complaints", json!("headache, photophobia")));
        assert_eq!(state.history_depth(), 0);
        assert!(!state.can_undo());
        assert!(!state.undo());
        assert!(state.is_dirty(), "edits still land, they are just not undoable");
        assert_eq!(
            state.data().get("complaints"),
            Some(&json!("headache, photophobia"))
        );
    }

    #[test]
    fn undo_back_to_the_saved_snapshot_clears_dirty() {
        let mut state = SessionState::new(50);
        state.load(&record_at(1));
        state.set_field("notes", json!("late addition"));
        assert!(state.is_dirty());
        state.undo();
        assert!(!state.is_dirty(), "working copy equals the saved baseline again");
    }

    #[test]
    fn undo_short_of_the_saved_snapshot_keeps_dirty() {
        let mut state = SessionState::new(50);
        state.load(&record_at(1));
        state.set_field("notes", json!("one"));
        state.set_field("notes", json!("two"));
        state.undo();
        assert!(state.is_dirty(), "still a pending change relative to the last save");
    }

    #[test]
    fn set_nested_field_snapshots_once_and_sets_dirty() {
        let mut state = SessionState::new(50);
        assert!(state.set_nested_field("exam.vitals.pulse", json!(72)));
        assert_eq!(state.history_depth(), 1);
        assert!(state.is_dirty());
        assert!(!state.set_nested_field("exam.vitals.pulse", json!(72)));
        assert_eq!(state.history_depth(), 1, "equal nested value is a no-op");
    }

    #[test]
    fn save_success_adopts_counters_and_rebaselines() {
        let mut state = SessionState::new(50);
        state.load(&record_at(1));
        state.set_field("diagnosis", json!("flu"));
        state.save_start();
        assert_eq!(state.status(), SessionStatus::Saving);

        let mut server = record_at(2);
        server.data = state.data().clone();
        state.save_success(&server);

        assert_eq!(state.status(), SessionStatus::Idle);
        assert!(!state.is_dirty());
        assert_eq!(state.version(), 2);
        assert_eq!(state.row_version(), 2);
        assert!(state.last_saved().is_some());
        assert_eq!(state.data().get("diagnosis"), Some(&json!("flu")));
    }

    #[test]
    fn save_success_never_lowers_the_version() {
        let mut state = SessionState::new(50);
        state.load(&record_at(5));
        state.save_success(&record_at(3));
        assert_eq!(state.version(), 5, "stale server counters are not adopted");
        assert_eq!(state.row_version(), 5);
    }

    #[test]
    fn lifecycle_never_regresses_through_save_success() {
        let mut state = SessionState::new(50);
        let mut signed = record_at(3);
        signed.lifecycle = LifecycleState::Signed;
        state.load(&signed);

        let mut stale = record_at(4);
        stale.lifecycle = LifecycleState::Draft;
        state.save_success(&stale);
        assert_eq!(state.lifecycle(), LifecycleState::Signed);
    }

    #[test]
    fn conflict_detected_preserves_local_edits() {
        let mut state = SessionState::new(50);
        state.load(&record_at(2));
        state.set_field("treatment", json!("rest"));
        state.conflict_detected(conflict_at(3, 2));

        assert_eq!(state.status(), SessionStatus::Conflict);
        assert_eq!(state.conflict().map(|c| c.server_version), Some(3));
        assert_eq!(state.data().get("treatment"), Some(&json!("rest")));
        assert!(state.is_dirty());
    }

    #[test]
    fn conflict_resolved_with_refresh_replaces_data_and_wipes_stacks() {
        let mut state = SessionState::new(50);
        state.load(&record_at(2));
        state.set_field("treatment", json!("rest"));
        state.conflict_detected(conflict_at(3, 2));

        let server = record_at(3);
        state.conflict_resolved(Some(&server));

        assert_eq!(state.status(), SessionStatus::Idle);
        assert!(state.conflict().is_none());
        assert!(!state.can_undo());
        assert!(!state.can_redo());
        assert!(!state.is_dirty());
        assert_eq!(state.data(), &server.data);
        assert_eq!(state.version(), 3);
    }

    #[test]
    fn conflict_resolved_without_refresh_only_clears_the_descriptor() {
        let mut state = SessionState::new(50);
        state.load(&record_at(2));
        state.set_field("treatment", json!("rest"));
        state.conflict_detected(conflict_at(3, 2));
        state.conflict_resolved(None);

        assert_eq!(state.status(), SessionStatus::Idle);
        assert!(state.conflict().is_none());
        assert_eq!(state.data().get("treatment"), Some(&json!("rest")));
        assert!(state.is_dirty(), "local edits remain pending");
    }

    #[test]
    fn set_field_clears_a_stale_error() {
        let mut state = SessionState::new(50);
        state.save_error("the wire went quiet");
        assert_eq!(state.status(), SessionStatus::Error);
        state.set_field("notes", json!("try again"));
        assert!(state.error_message().is_none());
        assert_eq!(state.status(), SessionStatus::Idle);
    }

    #[test]
    fn mark_signed_is_monotone() {
        let mut state = SessionState::new(50);
        state.mark_signed();
        assert_eq!(state.lifecycle(), LifecycleState::Signed);

        let mut amended = record_at(4);
        amended.lifecycle = LifecycleState::Amended;
        state.load(&amended);
        state.mark_signed();
        assert_eq!(state.lifecycle(), LifecycleState::Amended);
    }

    #[test]
    fn client_session_id_survives_loads() {
        let mut state = SessionState::new(50);
        let id = state.client_session_id();
        state.load(&record_at(1));
        state.load_new();
        assert_eq!(state.client_session_id(), id);
    }
}
