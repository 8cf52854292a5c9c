//! Supervisor State Machine
//!
//! ```text
//! Init ─► CircuitPending ─► Authenticating ─► Polling
//!              │                  │   ▲          │
//!              │                  │   └──────────┘ (empty response)
//!              ▼                  ▼
//!        Terminated(Fatal)  Terminated(Fatal)
//! ```
//!
//! `Stopped` is reached from any live state when the operator cancels.
//! Terminal states never transition again.

use serde::Serialize;

/// Reason a supervisor terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalReason {
    /// Proxy circuit never came up.
    CircuitFailed,
    /// Login attempts exceeded the ceiling.
    LoginAttemptsExceeded,
    /// Too many consecutive failed fetches.
    FetchFailuresExceeded,
    /// A request could not be built (configuration defect).
    InvalidRequest,
}

impl FatalReason {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CircuitFailed => "circuit_failed",
            Self::LoginAttemptsExceeded => "login_attempts_exceeded",
            Self::FetchFailuresExceeded => "fetch_failures_exceeded",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SupervisorState {
    /// Created, not started.
    #[default]
    Init,
    /// Waiting for the proxy circuit.
    CircuitPending,
    /// Logging in.
    Authenticating,
    /// Session live, fetching on every tick.
    Polling,
    /// Unrecoverable failure; the instance must be discarded.
    Terminated(FatalReason),
    /// Stopped by cancellation.
    Stopped,
}

impl SupervisorState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated(_) | Self::Stopped)
    }

    /// Whether fetches are dispatched in this state.
    #[must_use]
    pub const fn is_polling(self) -> bool {
        matches!(self, Self::Polling)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Terminated(_) | Self::Stopped, _) => false,
            (_, Self::Stopped)
            | (Self::Init, Self::CircuitPending)
            | (Self::CircuitPending, Self::Authenticating | Self::Terminated(_))
            | (Self::Authenticating, Self::Polling | Self::Terminated(_))
            | (Self::Polling, Self::Authenticating | Self::Terminated(_)) => true,
            _ => false,
        }
    }

    /// Stable label for logs and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CircuitPending => "circuit_pending",
            Self::Authenticating => "authenticating",
            Self::Polling => "polling",
            Self::Terminated(_) => "terminated",
            Self::Stopped => "stopped",
        }
    }
}
