//! Session management core module.
//!
//! A [`Session`](session::Session) is one benchmark connection, client or server side. This
//! module holds its role and the lifecycle states it moves through.

use serde::{Deserialize, Serialize};

/// Submodule for the session data structure and its state machine.
pub mod session;

pub use session::Session;

/// Which side of the benchmark a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    Server,
}

/// Represents the current state of a session.
///
/// Variants:
/// - `Connecting`: the socket is being set up (connect or accept in progress).
/// - `Established`: the duplex stream is open and the workload may run.
/// - `Closed`: the session ended, cleanly or because the peer or the user stopped it.
/// - `Failed`: the session could not be established or broke on a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Connecting,
    Established,
    Closed,
    Failed,
}

impl SessionState {
    /// States only move forward: `Connecting -> Established -> Closed | Failed`, or straight
    /// from `Connecting` to `Failed`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Connecting, SessionState::Established)
                | (SessionState::Connecting, SessionState::Failed)
                | (SessionState::Established, SessionState::Closed)
                | (SessionState::Established, SessionState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}
