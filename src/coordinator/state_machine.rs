use parking_lot::RwLock;

use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::types::SessionEvent;
use crate::session::SessionStatus;

/// Session-level state machine.
///
/// ```text
/// Pending ──start──► Uploading ──complete──► Completed
///   ▲                 │  │  │
///   │     retry       │  │  └──cancel──► Cancelled
///   │                 │  └──pause──► Paused ──resume──► Uploading
///   │                 └──fatal──► Failed
///   └─────────────────Failed
/// ```
pub struct SessionStateMachine {
    state: RwLock<SessionStatus>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionStatus::Pending),
        }
    }

    pub fn current(&self) -> SessionStatus {
        *self.state.read()
    }

    /// Apply an event, returning the new state or an error for transitions
    /// the lifecycle does not allow.
    pub fn transition(&self, event: SessionEvent) -> CoordinatorResult<SessionStatus> {
        let mut state = self.state.write();

        let next = match (*state, event) {
            // Starting requires a fresh or previously failed session.
            (SessionStatus::Pending, SessionEvent::Start) => SessionStatus::Uploading,
            (SessionStatus::Failed, SessionEvent::Start) => SessionStatus::Uploading,
            (SessionStatus::Failed, SessionEvent::Retry) => SessionStatus::Uploading,

            (SessionStatus::Uploading, SessionEvent::Pause) => SessionStatus::Paused,
            (SessionStatus::Paused, SessionEvent::Resume) => SessionStatus::Uploading,

            (SessionStatus::Uploading, SessionEvent::Complete) => SessionStatus::Completed,

            // Cancel is admissible from any non-terminal state.
            (s, SessionEvent::Cancel) if !s.is_terminal() => SessionStatus::Cancelled,

            // Fatal escalation from any non-terminal state.
            (s, SessionEvent::Fatal) if !s.is_terminal() => SessionStatus::Failed,

            (s, e) => {
                return Err(CoordinatorError::InvalidTransition(format!(
                    "cannot apply {e:?} in state {s:?}"
                )));
            }
        };

        *state = next;
        Ok(next)
    }
}
