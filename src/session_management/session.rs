use crate::error_handling::types::SessionError;
use crate::session_management::{Role, SessionState};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub role: Role,
    /// Address as configured: the bind address on the server, the target on the client.
    pub endpoint: String,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
    pub start_time: DateTime<Utc>,
    /// Set when the connection is up; the client's connect retries fall between the two.
    pub established_at: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    state: SessionState,
}

impl Session {
    pub fn new(role: Role, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            endpoint: endpoint.into(),
            local_addr: None,
            peer_addr: None,
            start_time: Utc::now(),
            established_at: None,
            end_time: None,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn establish(&mut self, local: SocketAddr, peer: SocketAddr) -> Result<(), SessionError> {
        self.transition(SessionState::Established)?;
        self.local_addr = Some(local);
        self.peer_addr = Some(peer);
        self.established_at = Some(Utc::now());
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Closed)
    }

    pub fn fail(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Failed)
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("[{}] session {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }
}
