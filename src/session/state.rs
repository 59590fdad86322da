//! Connection/session lifecycle state machine.
//!
//! ```text
//! Disconnected → Connecting → AwaitingConnectionAck → ConnectionReady
//!     → SessionOpen → SessionClosing → ConnectionClosing → Closed
//! ```
//!
//! `Failed` is absorbing and reachable from every non-terminal state.

use crate::error::SpeechError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingConnectionAck,
    ConnectionReady,
    SessionOpen,
    SessionClosing,
    ConnectionClosing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// The single forward successor of a non-terminal state.
    fn next(self) -> Option<Self> {
        Some(match self {
            Self::Disconnected => Self::Connecting,
            Self::Connecting => Self::AwaitingConnectionAck,
            Self::AwaitingConnectionAck => Self::ConnectionReady,
            Self::ConnectionReady => Self::SessionOpen,
            Self::SessionOpen => Self::SessionClosing,
            Self::SessionClosing => Self::ConnectionClosing,
            Self::ConnectionClosing => Self::Closed,
            Self::Closed | Self::Failed => return None,
        })
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        if to == Self::Failed {
            return !self.is_terminal();
        }
        // Task submission keeps the session open.
        if self == Self::SessionOpen && to == Self::SessionOpen {
            return true;
        }
        self.next() == Some(to)
    }
}

/// Guarded holder of the current [`SessionState`].
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
    session_id: String,
}

impl StateMachine {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            state: SessionState::Disconnected,
            session_id: session_id.into(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, to: SessionState) -> Result<(), SpeechError> {
        if !self.state.can_transition_to(to) {
            return Err(SpeechError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        if self.state != to {
            tracing::debug!(
                session_id = %self.session_id,
                from = ?self.state,
                to = ?to,
                "Session state transition"
            );
        }
        self.state = to;
        Ok(())
    }

    /// Force `Failed`. No-op once terminal.
    pub fn fail(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        tracing::warn!(
            session_id = %self.session_id,
            from = ?self.state,
            reason = %reason,
            "Session failed"
        );
        self.state = SessionState::Failed;
    }
}
