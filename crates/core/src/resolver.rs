//! Conflict resolution: the sanctioned remediation set, nothing else.
//!
//! Nothing in here merges content or picks a winner. Every way out of a
//! conflict is a distinct user action, and the destructive one takes two.

use emr_types::LifecycleState;

use crate::{SessionError, SessionResult};

/// Where conflict handling currently stands.
///
/// `none → detected → {reload | compare | amend | forced-overwrite} →
/// none`; compare is informational and leaves the phase alone, and the
/// forced overwrite additionally requires passing through `ForceArmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPhase {
    /// No conflict outstanding.
    None,
    /// A version conflict is waiting on the user.
    Detected,
    /// The advanced disclosure was opened; the next forced overwrite is
    /// accepted.
    ForceArmed,
}

/// Which resolutions the presentation layer should offer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionOptions {
    /// Discard local work and take the server's record. Always available
    /// during a conflict.
    pub can_reload: bool,
    /// Look at a field-level diff first. Always available during a
    /// conflict, and the recommended first step.
    pub can_compare: bool,
    /// Route the local edits into an amendment. Only for signed records.
    pub can_amend: bool,
    /// Whether the forced overwrite still needs its second deliberate
    /// action before it will be accepted.
    pub force_requires_arming: bool,
}

#[derive(Debug)]
pub struct ConflictResolver {
    phase: ConflictPhase,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self {
            phase: ConflictPhase::None,
        }
    }

    /// A version conflict came back from the server.
    ///
    /// Re-detection drops any earlier force arming: a fresh conflict
    /// means fresh circumstances, and the destructive path starts over.
    pub fn detect(&mut self) {
        self.phase = ConflictPhase::Detected;
    }

    /// The conflict is gone, whichever resolution did it.
    pub fn resolve(&mut self) {
        self.phase = ConflictPhase::None;
    }

    /// First of the two deliberate actions on the forced-overwrite path.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoConflict` when nothing is detected.
    pub fn arm_force(&mut self) -> SessionResult<()> {
        match self.phase {
            ConflictPhase::None => Err(SessionError::NoConflict),
            ConflictPhase::Detected | ConflictPhase::ForceArmed => {
                self.phase = ConflictPhase::ForceArmed;
                Ok(())
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase != ConflictPhase::None
    }

    pub fn is_force_armed(&self) -> bool {
        self.phase == ConflictPhase::ForceArmed
    }

    pub fn phase(&self) -> ConflictPhase {
        self.phase
    }

    /// Options for the given record lifecycle.
    pub fn options(&self, lifecycle: LifecycleState) -> ResolutionOptions {
        let active = self.is_active();
        ResolutionOptions {
            can_reload: active,
            can_compare: active,
            can_amend: active && lifecycle.is_signed_or_later(),
            force_requires_arming: !self.is_force_armed(),
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}
