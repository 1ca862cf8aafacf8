//! Lifecycle state machine for a proxied connection.
//!
//! [`PipeState::on_event`] is a pure transition function: it never performs
//! I/O, it only reports the [`PipeAction`] the driving task must carry out.
//! This keeps the ordering rules (one dial per pipe, no frontend reads while
//! dialing, drain before close) testable without sockets.

use std::fmt;

/// One end of a proxied connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// The client connection accepted by the proxy.
    Frontend,
    /// The connection the proxy dialed to the upstream service.
    Backend,
}

impl Side {
    /// The opposite end of the pipe.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Frontend => Self::Backend,
            Self::Backend => Self::Frontend,
        }
    }

    /// Returns the side name as a static string for metrics and logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Backend => "backend",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Lifecycle of a [`ConnectionPipe`](super::ConnectionPipe).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipeState {
    /// Frontend accepted, nothing requested yet.
    #[default]
    Idle,
    /// Backend dial in progress; frontend reads are suspended.
    Connecting,
    /// Bytes flow verbatim in both directions.
    Forwarding,
    /// One side reached end of input; the other is being drained and closed.
    Closing,
    /// Both sides are closed. Terminal.
    Closed,
}

/// Inputs driving the pipe lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipeEvent {
    /// The frontend connection became active.
    FrontendActive,
    /// The backend dial completed.
    ConnectSucceeded,
    /// The backend dial failed or timed out.
    ConnectFailed,
    /// `side` reported end of input.
    EndOfInput(Side),
    /// Both sides have been shut down after an end of input.
    ShutdownComplete,
    /// Reading from or writing to `side` failed.
    TransportError(Side),
}

/// Work the driving task must perform after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipeAction {
    /// Nothing to do.
    None,
    /// Stop reading from the frontend and dial the backend.
    SuspendFrontendAndDial,
    /// Bind the backend and resume frontend reads.
    ResumeFrontend,
    /// Close the frontend without forwarding anything.
    CloseFrontend,
    /// Flush and shut down the side opposite `eof`, then shut down `eof`.
    DrainAndClose {
        /// Side that reported end of input.
        eof: Side,
    },
    /// Drop both sides immediately without draining.
    Abort,
}

impl PipeState {
    /// Apply `event`, returning the next state and the action to perform.
    ///
    /// # Examples
    ///
    /// ```
    /// use wireproxy::proxy::{PipeAction, PipeEvent, PipeState};
    ///
    /// let (state, action) = PipeState::Idle.on_event(PipeEvent::FrontendActive);
    /// assert_eq!(state, PipeState::Connecting);
    /// assert_eq!(action, PipeAction::SuspendFrontendAndDial);
    ///
    /// let (state, action) = state.on_event(PipeEvent::FrontendActive);
    /// assert_eq!(state, PipeState::Connecting);
    /// assert_eq!(action, PipeAction::None);
    /// ```
    #[must_use]
    pub fn on_event(self, event: PipeEvent) -> (Self, PipeAction) {
        match (self, event) {
            (Self::Closed, _) => (Self::Closed, PipeAction::None),
            (Self::Idle, PipeEvent::FrontendActive) => {
                (Self::Connecting, PipeAction::SuspendFrontendAndDial)
            }
            (Self::Connecting, PipeEvent::ConnectSucceeded) => {
                (Self::Forwarding, PipeAction::ResumeFrontend)
            }
            (Self::Connecting, PipeEvent::ConnectFailed) => (Self::Closed, PipeAction::CloseFrontend),
            (Self::Forwarding, PipeEvent::EndOfInput(eof)) => {
                (Self::Closing, PipeAction::DrainAndClose { eof })
            }
            (Self::Closing, PipeEvent::ShutdownComplete) => (Self::Closed, PipeAction::None),
            (Self::Idle | Self::Connecting, PipeEvent::EndOfInput(_))
            | (_, PipeEvent::TransportError(_)) => (Self::Closed, PipeAction::Abort),
            (state, _) => (state, PipeAction::None),
        }
    }

    /// Returns `true` once the pipe has fully closed.
    #[must_use]
    pub const fn is_closed(self) -> bool { matches!(self, Self::Closed) }
}
