//! Navigation guard: one prompt between unsaved work and the back button.

/// Answer to "may this navigation proceed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveDecision {
    /// Nothing unsaved; go.
    Proceed,
    /// Unsaved changes; put the confirmation prompt up.
    Confirm,
    /// A prompt is already open for this attempt; do not stack another.
    AlreadyPrompting,
}

/// Tracks whether a confirmation prompt is currently open.
///
/// The guard takes the dirty flag as an argument on every request, so it
/// lifts itself the instant the session goes clean; there is no clear
/// call to forget.
#[derive(Debug, Default)]
pub struct NavigationGuard {
    prompting: bool,
}

impl NavigationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A navigation or unload was attempted.
    pub fn request_leave(&mut self, dirty: bool) -> LeaveDecision {
        if !dirty {
            self.prompting = false;
            return LeaveDecision::Proceed;
        }
        if self.prompting {
            return LeaveDecision::AlreadyPrompting;
        }
        self.prompting = true;
        LeaveDecision::Confirm
    }

    /// The user answered the prompt. Returns whether to leave.
    pub fn answer(&mut self, leave: bool) -> bool {
        self.prompting = false;
        leave
    }

    pub fn is_prompting(&self) -> bool {
        self.prompting
    }
}
