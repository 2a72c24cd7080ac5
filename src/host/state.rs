//! Lifecycle states of one extension controller.
//!
//! ```text
//! Created ─► ContextLoading ─► HandshakeInProgress ─► Ready ─► Running
//!    │              │                   │               │         │
//!    │              └───────────────────┴─────┬─────────┴─────────┘
//!    │                                        ▼
//!    └──────────────────────────────────►  Exiting ─► Terminated
//!
//! FatalError is reachable from every state except Terminated.
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ControllerState
// ============================================================================

/// Where a controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Constructed, nothing launched.
    Created,
    /// Context launched, waiting for `secureContextEstablished`.
    ContextLoading,
    /// Secure context up, waiting for `readyForDisplay`.
    HandshakeInProgress,
    /// Accepting capability-gated calls.
    Ready,
    /// Frame shown to the user.
    Running,
    /// Tearing down after `exit`.
    Exiting,
    /// Context destroyed.
    Terminated,
    /// Context destroyed after an unrecoverable error.
    FatalError,
}

impl ControllerState {
    /// Returns `true` if the move to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ControllerState::*;

        match (self, next) {
            (Terminated | FatalError, _) => false,
            (_, FatalError) => true,
            (Created, ContextLoading | Exiting)
            | (ContextLoading, HandshakeInProgress | Exiting)
            | (HandshakeInProgress, Ready | Exiting)
            | (Ready, Running | Exiting)
            | (Running, Exiting)
            | (Exiting, Terminated) => true,
            _ => false,
        }
    }

    /// Returns `true` once no further transition is possible.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::FatalError)
    }

    /// Returns `true` in the states where privileged handlers may run.
    #[inline]
    #[must_use]
    pub const fn accepts_privileged_calls(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::ContextLoading => "context_loading",
            Self::HandshakeInProgress => "handshake_in_progress",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Exiting => "exiting",
            Self::Terminated => "terminated",
            Self::FatalError => "fatal_error",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
