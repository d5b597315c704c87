//! Session lifecycle
//!
//! ```text
//! Idle -> Ingesting -> Terminated
//!                   \-> Failed
//! ```

use std::fmt;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, no producer bytes yet
    Idle,
    /// Producer connected; the only state that accepts appends
    Ingesting,
    /// Producer stream ended cleanly; retained history stays readable
    Terminated,
    /// Producer stream errored; the session reads as empty
    Failed,
}

impl SessionState {
    /// Can segments be appended?
    #[inline]
    pub fn accepts_appends(self) -> bool {
        matches!(self, SessionState::Ingesting)
    }

    /// Can retained history be read (relay backfill, export)?
    #[inline]
    pub fn is_readable(self) -> bool {
        !matches!(self, SessionState::Failed)
    }

    /// Has ingest stopped for good?
    #[inline]
    pub fn is_finished(self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }

    /// Is `next` a legal transition from this state?
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::Ingesting)
                | (SessionState::Idle, SessionState::Failed)
                | (SessionState::Ingesting, SessionState::Terminated)
                | (SessionState::Ingesting, SessionState::Failed)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Ingesting => "ingesting",
            SessionState::Terminated => "terminated",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
