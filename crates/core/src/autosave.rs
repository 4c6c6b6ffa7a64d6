//! Autosave scheduling: when to try a save nobody asked for.
//!
//! The scheduler is a plain value over [`Instant`] deadlines (arm,
//! cancel, fire) rather than ambient timer handles. The owner drives it
//! with the current time, so tests advance a synthetic clock and every
//! timing property here is checked without sleeping. Dropping the owner
//! drops the deadlines; nothing can fire against a disposed session.
//!
//! Whether a fired tick is allowed to actually save is the session's
//! decision (the `can_save` gate); this type only answers "is it time".

use std::time::{Duration, Instant};

use crate::SessionConfig;

/// Debounce, max-wait, backoff, and pause bookkeeping for one session.
#[derive(Debug)]
pub struct AutosaveScheduler {
    debounce: Duration,
    max_wait: Duration,
    backoff_cap: Duration,
    failure_limit: u32,
    enabled: bool,
    debounce_deadline: Option<Instant>,
    max_deadline: Option<Instant>,
    failures: u32,
    paused: bool,
}

impl AutosaveScheduler {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            debounce: config.debounce(),
            max_wait: config.max_wait(),
            backoff_cap: config.backoff_cap(),
            failure_limit: config.failure_limit(),
            enabled: config.autosave_enabled(),
            debounce_deadline: None,
            max_deadline: None,
            failures: 0,
            paused: false,
        }
    }

    /// An edit happened: re-arm the debounce deadline.
    ///
    /// The max-wait deadline is armed only when a burst begins (nothing
    /// pending yet) and deliberately does not move on later edits, so
    /// continuous typing still produces a save within the bound.
    pub fn note_edit(&mut self, now: Instant) {
        if !self.enabled || self.paused {
            return;
        }
        self.debounce_deadline = Some(now + self.current_delay());
        if self.max_deadline.is_none() {
            self.max_deadline = Some(now + self.max_wait);
        }
    }

    /// The session went clean outside a save (an undo walked back to the
    /// saved snapshot, or a manual save landed first): nothing left to
    /// autosave.
    pub fn note_clean(&mut self) {
        self.debounce_deadline = None;
        self.max_deadline = None;
    }

    /// Earliest pending deadline, for shells that sleep until it.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce_deadline, self.max_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Whether a deadline has been reached. Firing clears both deadlines;
    /// whichever timer came first triggers the one attempt.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.next_deadline() {
            Some(deadline) if deadline <= now => {
                self.debounce_deadline = None;
                self.max_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// A scheduled save landed; the failure streak is over.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// A scheduled save failed.
    ///
    /// Transient trouble re-arms with exponential backoff until the
    /// failure limit, at which point autosave stops trying on its own.
    /// Non-transient refusals (expired session, forbidden) pause at once;
    /// retrying them changes nothing. Either way only a manual save
    /// attempt resumes the scheduler.
    pub fn record_failure(&mut self, now: Instant, transient: bool) {
        self.failures += 1;
        if self.failures >= self.failure_limit || !transient {
            self.paused = true;
            self.debounce_deadline = None;
            self.max_deadline = None;
            tracing::warn!(
                failures = self.failures,
                transient,
                "autosave paused; a manual save is required to resume"
            );
            return;
        }
        self.debounce_deadline = Some(now + self.current_delay());
        self.max_deadline = Some(now + self.max_wait);
    }

    /// The user saved by hand (whatever the outcome): reset the failure
    /// streak and resume scheduling.
    pub fn note_manual_attempt(&mut self) {
        self.failures = 0;
        self.paused = false;
    }

    /// Runtime toggle. Disabling cancels anything pending.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.note_clean();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next attempt will wait after an edit: the debounce,
    /// doubled per consecutive failure, capped.
    pub fn current_delay(&self) -> Duration {
        let factor = 1u32 << self.failures.min(16);
        self.debounce.saturating_mul(factor).min(self.backoff_cap)
    }
}
