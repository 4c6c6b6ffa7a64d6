//! Session configuration.
//!
//! This module defines configuration that should be resolved once when a
//! session is opened and then passed in, rather than read from ambient
//! state while editing. Timing values are plain `Duration`s so tests can
//! shrink them without touching a clock.

use std::time::Duration;

use crate::{SessionError, SessionResult};

/// Debounce delay between the last edit and an autosave attempt.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);
/// Ceiling on how long continuous typing can defer an autosave.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);
/// Ceiling on the exponential backoff delay after failed autosaves.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Consecutive failures after which autosave stops trying on its own.
pub const DEFAULT_FAILURE_LIMIT: u32 = 3;
/// Undo/redo depth; the oldest snapshot is evicted beyond this.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Configuration for one editing session, resolved at open time.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    debounce: Duration,
    max_wait: Duration,
    backoff_cap: Duration,
    failure_limit: u32,
    history_cap: usize,
    autosave_enabled: bool,
}

impl SessionConfig {
    /// Create a new `SessionConfig`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidInput` if `debounce` is zero, if
    /// `max_wait` or `backoff_cap` undercut `debounce`, or if a count is
    /// zero.
    pub fn new(
        debounce: Duration,
        max_wait: Duration,
        backoff_cap: Duration,
        failure_limit: u32,
        history_cap: usize,
        autosave_enabled: bool,
    ) -> SessionResult<Self> {
        if debounce.is_zero() {
            return Err(SessionError::InvalidInput(
                "debounce must be greater than zero".into(),
            ));
        }
        if max_wait < debounce {
            return Err(SessionError::InvalidInput(
                "max_wait cannot be shorter than debounce".into(),
            ));
        }
        if backoff_cap < debounce {
            return Err(SessionError::InvalidInput(
                "backoff_cap cannot be shorter than debounce".into(),
            ));
        }
        if failure_limit == 0 {
            return Err(SessionError::InvalidInput(
                "failure_limit must be at least 1".into(),
            ));
        }
        if history_cap == 0 {
            return Err(SessionError::InvalidInput(
                "history_cap must be at least 1".into(),
            ));
        }

        Ok(Self {
            debounce,
            max_wait,
            backoff_cap,
            failure_limit,
            history_cap,
            autosave_enabled,
        })
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn backoff_cap(&self) -> Duration {
        self.backoff_cap
    }

    pub fn failure_limit(&self) -> u32 {
        self.failure_limit
    }

    pub fn history_cap(&self) -> usize {
        self.history_cap
    }

    pub fn autosave_enabled(&self) -> bool {
        self.autosave_enabled
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_wait: DEFAULT_MAX_WAIT,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            failure_limit: DEFAULT_FAILURE_LIMIT,
            history_cap: DEFAULT_HISTORY_CAP,
            autosave_enabled: true,
        }
    }
}
