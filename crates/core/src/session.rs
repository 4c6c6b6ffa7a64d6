//! The document session: one record, one editing surface, one facade.
//!
//! `DocumentSession` owns the state store, the autosave scheduler, the
//! conflict resolver, and the navigation guard, and talks to a
//! [`RecordEndpoint`]. It is constructed explicitly, disposed by drop,
//! and never touches wall-clock time on its own: the shell passes `now`
//! into everything time-sensitive and drives autosave by polling, so the
//! whole flow runs under synthetic instants in tests.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;

use emr_types::{AmendmentReason, ConflictInfo, DiffReport, LifecycleState, Record, RecordId};

use crate::autosave::AutosaveScheduler;
use crate::config::SessionConfig;
use crate::diff::{build_report, compute_changes};
use crate::endpoint::{RecordEndpoint, SaveOutcome, WriteRequest};
use crate::error::{ApiError, SessionError, SessionResult};
use crate::guard::{LeaveDecision, NavigationGuard};
use crate::resolver::{ConflictResolver, ResolutionOptions};
use crate::revisions::RevisionBrowser;
use crate::state::{SessionState, SessionStatus};

/// What one autosave poll did.
#[derive(Debug)]
pub enum AutosaveTick {
    /// Nothing armed.
    Idle,
    /// Armed but not due; poll again by this instant.
    WaitUntil(Instant),
    /// A deadline passed but the save gate refused, so nothing was sent.
    /// The next edit re-arms.
    Skipped,
    /// An attempt ran and the server answered.
    Completed(SaveOutcome),
    /// An attempt ran and failed; backoff or pause has been applied.
    Failed(ApiError),
}

/// One line for the status indicator, worst condition first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    Loading,
    Saving,
    Conflict,
    SessionExpired,
    Forbidden,
    Failed(String),
    Unsaved,
    Clean,
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusLine::Loading => write!(f, "loading"),
            StatusLine::Saving => write!(f, "saving"),
            StatusLine::Conflict => write!(f, "conflict: the record changed on the server"),
            StatusLine::SessionExpired => write!(f, "session expired; sign in again to save"),
            StatusLine::Forbidden => write!(f, "you do not have permission to write this record"),
            StatusLine::Failed(message) => write!(f, "save failed: {message}"),
            StatusLine::Unsaved => write!(f, "unsaved changes"),
            StatusLine::Clean => write!(f, "all changes saved"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorFlavour {
    SessionExpired,
    Forbidden,
    Other,
}

fn flavour_of(error: &ApiError) -> ErrorFlavour {
    match error {
        ApiError::SessionExpired => ErrorFlavour::SessionExpired,
        ApiError::Forbidden => ErrorFlavour::Forbidden,
        ApiError::Server { .. } | ApiError::Transport(_) | ApiError::Decode(_) => {
            ErrorFlavour::Other
        }
    }
}

pub struct DocumentSession<E: RecordEndpoint> {
    endpoint: E,
    identity: RecordId,
    config: SessionConfig,
    state: SessionState,
    scheduler: AutosaveScheduler,
    resolver: ConflictResolver,
    guard: NavigationGuard,
    last_failure: Option<ErrorFlavour>,
}

impl<E: RecordEndpoint> DocumentSession<E> {
    /// Opens a session on the record, loading it from the endpoint. A
    /// missing record is not an error: the session starts as a fresh
    /// draft at `(version, row_version) = (1, 0)` and the first
    /// successful save creates it.
    ///
    /// # Errors
    ///
    /// Returns the endpoint's failure when the initial load cannot
    /// complete.
    pub async fn open(endpoint: E, identity: RecordId, config: SessionConfig) -> SessionResult<Self> {
        let mut session = Self {
            state: SessionState::new(config.history_cap()),
            scheduler: AutosaveScheduler::new(&config),
            resolver: ConflictResolver::new(),
            guard: NavigationGuard::new(),
            last_failure: None,
            endpoint,
            identity,
            config,
        };
        session.state.begin_loading();
        match session.endpoint.load(&session.identity).await {
            Ok(Some(record)) => {
                tracing::info!(
                    identity = %session.identity,
                    version = record.version,
                    lifecycle = %record.lifecycle,
                    "record loaded"
                );
                session.state.load(&record);
            }
            Ok(None) => {
                tracing::info!(identity = %session.identity, "no record yet; starting a fresh draft");
                session.state.load_new();
            }
            Err(err) => {
                session.state.load_error(err.to_string());
                return Err(err.into());
            }
        }
        Ok(session)
    }

    // --- editing ---------------------------------------------------------

    /// Applies one field edit and re-arms the autosave debounce.
    ///
    /// Editing stays open while a conflict is pending. The working copy
    /// has to survive for the compare and amend resolutions, so only
    /// outgoing saves freeze. Returns whether anything changed.
    pub fn set_field(&mut self, field: &str, value: Value, now: Instant) -> bool {
        let changed = self.state.set_field(field, value);
        if changed {
            self.scheduler.note_edit(now);
        }
        changed
    }

    /// [`set_field`](DocumentSession::set_field) at a dotted path.
    pub fn set_nested_field(&mut self, path: &str, value: Value, now: Instant) -> bool {
        let changed = self.state.set_nested_field(path, value);
        if changed {
            self.scheduler.note_edit(now);
        }
        changed
    }

    /// Steps back one snapshot. Landing exactly on the saved baseline
    /// makes the session clean again and cancels any pending autosave.
    pub fn undo(&mut self, now: Instant) -> bool {
        if !self.state.undo() {
            return false;
        }
        self.sync_scheduler_after_step(now);
        true
    }

    /// Steps forward one snapshot.
    pub fn redo(&mut self, now: Instant) -> bool {
        if !self.state.redo() {
            return false;
        }
        self.sync_scheduler_after_step(now);
        true
    }

    fn sync_scheduler_after_step(&mut self, now: Instant) {
        if self.state.is_dirty() {
            self.scheduler.note_edit(now);
        } else {
            self.scheduler.note_clean();
        }
    }

    // --- saving ----------------------------------------------------------

    /// Saves the working copy now, at the user's request.
    ///
    /// A conflict or a signed refusal is a returned [`SaveOutcome`], not
    /// an error. When the session already knows the record is signed the
    /// refusal is local and no request goes out. Whatever the outcome,
    /// the attempt resets the autosave failure streak and resumes a
    /// paused scheduler.
    ///
    /// # Errors
    ///
    /// Rejected locally when a save is already in flight, when an
    /// unresolved conflict is pending, or when there is nothing to save.
    /// Endpoint failures carry through as [`SessionError::Api`].
    pub async fn save(&mut self) -> SessionResult<SaveOutcome> {
        self.ensure_not_saving()?;
        self.ensure_no_conflict_pending()?;
        if self.state.lifecycle().is_signed_or_later() {
            return Ok(SaveOutcome::AlreadySigned);
        }
        if !self.state.is_dirty() {
            return Err(SessionError::InvalidInput(
                "no unsaved changes to save".to_owned(),
            ));
        }
        self.scheduler.note_manual_attempt();
        self.state.save_start();
        let request = self.write_request();
        match self.endpoint.save(&self.identity, request, false).await {
            Ok(outcome) => Ok(self.adopt_outcome(outcome)),
            Err(err) => Err(self.note_write_failure(err)),
        }
    }

    /// Saves the working copy and moves the lifecycle to signed.
    ///
    /// Signing does not require pending edits: reviewing a loaded draft
    /// and signing it untouched is legitimate.
    ///
    /// # Errors
    ///
    /// Same local gates as [`save`](DocumentSession::save), minus the
    /// dirty requirement.
    pub async fn sign(&mut self) -> SessionResult<SaveOutcome> {
        self.ensure_not_saving()?;
        self.ensure_no_conflict_pending()?;
        if self.state.lifecycle().is_signed_or_later() {
            return Ok(SaveOutcome::AlreadySigned);
        }
        self.scheduler.note_manual_attempt();
        self.state.save_start();
        let request = self.write_request();
        match self.endpoint.sign(&self.identity, request).await {
            Ok(outcome) => {
                let outcome = self.adopt_outcome(outcome);
                if matches!(outcome, SaveOutcome::Saved(_)) {
                    tracing::info!(identity = %self.identity, version = self.state.version(), "record signed");
                }
                Ok(outcome)
            }
            Err(err) => Err(self.note_write_failure(err)),
        }
    }

    /// Records an amendment to a signed record, carrying the current
    /// working copy and the stated reason.
    ///
    /// The reason is validated here first; a short reason never reaches
    /// the wire. Amending is also a legal exit from a conflict on a
    /// signed record, so no conflict gate applies.
    ///
    /// # Errors
    ///
    /// Rejected locally for an in-flight save, an invalid reason, or an
    /// unsigned record.
    pub async fn amend(&mut self, reason: &str) -> SessionResult<Record> {
        self.ensure_not_saving()?;
        let reason = AmendmentReason::new(reason)?;
        if !self.state.lifecycle().is_signed_or_later() {
            return Err(SessionError::AmendRequiresSignature);
        }
        self.scheduler.note_manual_attempt();
        self.state.save_start();
        let request = self.write_request();
        match self.endpoint.amend(&self.identity, request, &reason).await {
            Ok(record) => {
                self.last_failure = None;
                self.state.save_success(&record);
                self.resolver.resolve();
                self.scheduler.note_clean();
                tracing::info!(identity = %self.identity, version = record.version, "amendment recorded");
                Ok(record)
            }
            Err(err) => Err(self.note_write_failure(err)),
        }
    }

    // --- conflict handling ----------------------------------------------

    /// Discards local work and adopts the server's current record. This
    /// is the reload resolution during a conflict and a plain refresh
    /// outside one; either way local edits and both undo stacks go.
    ///
    /// # Errors
    ///
    /// Rejected while a save is in flight; endpoint failures carry
    /// through and leave the previous working copy untouched.
    pub async fn reload_from_server(&mut self) -> SessionResult<Option<Record>> {
        self.ensure_not_saving()?;
        self.state.begin_loading();
        match self.endpoint.load(&self.identity).await {
            Ok(Some(record)) => {
                if self.resolver.is_active() {
                    self.resolver.resolve();
                    self.state.conflict_resolved(Some(&record));
                } else {
                    self.state.load(&record);
                }
                self.last_failure = None;
                self.scheduler.note_clean();
                Ok(Some(record))
            }
            Ok(None) => {
                self.resolver.resolve();
                self.state.load_new();
                self.last_failure = None;
                self.scheduler.note_clean();
                Ok(None)
            }
            Err(err) => {
                self.state.load_error(err.to_string());
                self.last_failure = Some(flavour_of(&err));
                Err(err.into())
            }
        }
    }

    /// Field-level differences between the server's current copy and the
    /// local working copy, oldest side first. Read-only: state, stacks,
    /// and deadlines are untouched, so comparing is always safe.
    pub async fn compare_with_server(&self) -> SessionResult<DiffReport> {
        let server = self.endpoint.load(&self.identity).await?;
        let (server_version, server_data) = match &server {
            Some(record) => (record.version, record.data.clone()),
            None => (0, Default::default()),
        };
        let changes = compute_changes(&server_data, self.state.data());
        Ok(build_report(server_version, self.state.version(), changes))
    }

    /// First deliberate action of the forced-overwrite path.
    ///
    /// # Errors
    ///
    /// There must be a conflict to overwrite.
    pub fn arm_force(&mut self) -> SessionResult<()> {
        self.resolver.arm_force()
    }

    /// Second deliberate action: push the local copy over the server's,
    /// accepting that the intervening edit is discarded. The arming is
    /// consumed by the attempt whatever its outcome.
    ///
    /// # Errors
    ///
    /// Rejected unless [`arm_force`](DocumentSession::arm_force) was
    /// called first.
    pub async fn force_overwrite(&mut self) -> SessionResult<SaveOutcome> {
        self.ensure_not_saving()?;
        if !self.resolver.is_force_armed() {
            return Err(SessionError::ForceNotArmed);
        }
        self.scheduler.note_manual_attempt();
        self.state.save_start();
        let request = self.write_request();
        match self.endpoint.save(&self.identity, request, true).await {
            Ok(SaveOutcome::Saved(record)) => {
                tracing::warn!(
                    identity = %self.identity,
                    version = record.version,
                    "forced overwrite landed; the server's intervening edit was discarded"
                );
                Ok(self.adopt_outcome(SaveOutcome::Saved(record)))
            }
            Ok(outcome) => Ok(self.adopt_outcome(outcome)),
            Err(err) => {
                // Arming does not survive a failed attempt.
                self.resolver.detect();
                Err(self.note_write_failure(err))
            }
        }
    }

    /// What the resolution modal may offer right now, given the record's
    /// lifecycle.
    pub fn resolution_options(&self) -> ResolutionOptions {
        self.resolver.options(self.state.lifecycle())
    }

    // --- autosave driving ------------------------------------------------

    /// Advances the autosave clock to `now` and runs at most one save
    /// attempt.
    ///
    /// The shell calls this from its timer loop; tests call it with
    /// synthetic instants. Failures are reported in the returned tick
    /// and in the status line rather than as `Err`, because nobody is
    /// there to catch an autosave.
    pub async fn poll_autosave(&mut self, now: Instant) -> AutosaveTick {
        let Some(deadline) = self.scheduler.next_deadline() else {
            return AutosaveTick::Idle;
        };
        if !self.scheduler.fire_due(now) {
            return AutosaveTick::WaitUntil(deadline);
        }
        if !self.autosave_gate_open() {
            return AutosaveTick::Skipped;
        }

        self.state.save_start();
        let request = self.write_request();
        match self.endpoint.save(&self.identity, request, false).await {
            Ok(outcome) => {
                let outcome = self.adopt_outcome(outcome);
                if matches!(outcome, SaveOutcome::Saved(_)) {
                    self.scheduler.record_success();
                    tracing::debug!(identity = %self.identity, version = self.state.version(), "autosaved");
                }
                AutosaveTick::Completed(outcome)
            }
            Err(err) => AutosaveTick::Failed(self.note_autosave_failure(err, now)),
        }
    }

    /// Runtime toggle for autosave. Disabling cancels pending deadlines;
    /// manual saves are unaffected.
    pub fn set_autosave_enabled(&mut self, enabled: bool) {
        self.scheduler.set_enabled(enabled);
    }

    fn autosave_gate_open(&self) -> bool {
        self.can_save() && self.scheduler.is_enabled() && !self.scheduler.is_paused()
    }

    // --- navigation ------------------------------------------------------

    /// Asks whether leaving is fine. Clean sessions pass straight
    /// through; a dirty session gets exactly one confirmation prompt.
    pub fn request_leave(&mut self) -> LeaveDecision {
        self.guard.request_leave(self.state.is_dirty())
    }

    /// Answers the open prompt. Returns whether navigation proceeds.
    pub fn answer_leave(&mut self, leave: bool) -> bool {
        self.guard.answer(leave)
    }

    // --- shared internals ------------------------------------------------

    fn write_request(&self) -> WriteRequest {
        WriteRequest {
            data: self.state.data().clone(),
            row_version: self.state.row_version(),
            client_session_id: self.state.client_session_id(),
        }
    }

    fn ensure_not_saving(&self) -> SessionResult<()> {
        if self.state.status() == SessionStatus::Saving {
            return Err(SessionError::SaveInFlight);
        }
        Ok(())
    }

    fn ensure_no_conflict_pending(&self) -> SessionResult<()> {
        if self.resolver.is_active() {
            return Err(SessionError::ConflictPending);
        }
        Ok(())
    }

    /// Folds a server answer into local state. Success re-baselines;
    /// a conflict freezes saving until resolved; a signed refusal marks
    /// the lifecycle and stands autosave down.
    fn adopt_outcome(&mut self, outcome: SaveOutcome) -> SaveOutcome {
        // The exchange reached the server, so any earlier failure
        // flavour is stale; the banner must describe this answer.
        self.last_failure = None;
        match &outcome {
            SaveOutcome::Saved(record) => {
                self.state.save_success(record);
                self.resolver.resolve();
                self.scheduler.note_clean();
            }
            SaveOutcome::Conflict(info) => {
                tracing::warn!(
                    identity = %self.identity,
                    server_version = info.server_version,
                    local_version = info.your_version,
                    edited_by = %info.last_edited_by,
                    "save refused: the record moved on the server"
                );
                self.state.conflict_detected(info.clone());
                self.resolver.detect();
                self.scheduler.note_clean();
            }
            SaveOutcome::AlreadySigned => {
                tracing::warn!(
                    identity = %self.identity,
                    "save refused: the record was signed in the meantime"
                );
                self.state.mark_signed();
                self.state.save_error(
                    "the record was signed on the server; reload it or record an amendment",
                );
                if self.resolver.is_active() {
                    self.resolver.detect();
                }
                self.scheduler.note_clean();
            }
        }
        outcome
    }

    /// A manual write failed. Logs, stamps the status banner, and hands
    /// the error back wrapped.
    fn note_write_failure(&mut self, err: ApiError) -> SessionError {
        tracing::warn!(identity = %self.identity, error = %err, "write failed");
        self.last_failure = Some(flavour_of(&err));
        self.state.save_error(err.to_string());
        err.into()
    }

    /// A scheduled write failed. The first failure of a burst logs at
    /// warn; repeats drop to debug until something succeeds. Backoff or
    /// pause is applied here.
    fn note_autosave_failure(&mut self, err: ApiError, now: Instant) -> ApiError {
        if self.scheduler.consecutive_failures() == 0 {
            tracing::warn!(identity = %self.identity, error = %err, "autosave failed; backing off");
        } else {
            tracing::debug!(identity = %self.identity, error = %err, "autosave failed again");
        }
        self.last_failure = Some(flavour_of(&err));
        self.state.save_error(err.to_string());
        self.scheduler.record_failure(now, err.is_transient());
        err
    }

    // --- snapshot accessors ----------------------------------------------

    pub fn identity(&self) -> &RecordId {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn data(&self) -> &emr_types::RecordData {
        self.state.data()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    pub fn version(&self) -> u64 {
        self.state.version()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.lifecycle()
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        self.state.conflict()
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.state.last_saved()
    }

    pub fn can_undo(&self) -> bool {
        self.state.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.state.can_redo()
    }

    /// Whether the save button should be live: pending changes, nothing
    /// in flight, no conflict, record still changeable.
    pub fn can_save(&self) -> bool {
        self.state.is_dirty()
            && self.state.status() != SessionStatus::Saving
            && self.state.status() != SessionStatus::Conflict
            && !self.state.lifecycle().is_signed_or_later()
    }

    pub fn can_sign(&self) -> bool {
        self.state.status() != SessionStatus::Saving
            && self.state.status() != SessionStatus::Conflict
            && !self.state.lifecycle().is_signed_or_later()
    }

    pub fn can_amend(&self) -> bool {
        self.state.status() != SessionStatus::Saving
            && self.state.lifecycle().is_signed_or_later()
    }

    /// Read-only access to the record's revision trail.
    pub fn revisions(&self) -> RevisionBrowser<'_, E> {
        RevisionBrowser::new(&self.endpoint, &self.identity)
    }

    /// One line for the status indicator.
    pub fn status_line(&self) -> StatusLine {
        match self.state.status() {
            SessionStatus::Loading => StatusLine::Loading,
            SessionStatus::Saving => StatusLine::Saving,
            SessionStatus::Conflict => StatusLine::Conflict,
            SessionStatus::Error => match self.last_failure {
                Some(ErrorFlavour::SessionExpired) => StatusLine::SessionExpired,
                Some(ErrorFlavour::Forbidden) => StatusLine::Forbidden,
                _ => StatusLine::Failed(
                    self.state.error_message().unwrap_or("unknown failure").to_owned(),
                ),
            },
            SessionStatus::Idle => {
                if self.state.is_dirty() {
                    StatusLine::Unsaved
                } else {
                    StatusLine::Clean
                }
            }
        }
    }
}
