//! The `Session` pairing unit and its state machine.
//!
//! A session links at most one client connection and at most one supervisor
//! connection:
//!
//! ```text
//!  open(role, conn)        join(counterpart, conn)        close()
//! ─────────────────► UNPAIRED ───────────────────► PAIRED ─────────► CLOSED
//!                        │                                             ▲
//!                        └─────────────────── close() ─────────────────┘
//! ```
//!
//! `PAIRED` holds exactly when both slots are filled; `CLOSED` is terminal.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{ConnectionId, Role, SessionId};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Unpaired,
    Paired,
    Closed,
}

/// Errors raised when a connection cannot be placed into a session slot.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("the {role} slot of session {session_id} is already occupied")]
    SlotOccupied { session_id: SessionId, role: Role },

    #[error("session {0} is closed")]
    Closed(SessionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    session_id: SessionId,
    client_connection_id: Option<ConnectionId>,
    supervisor_connection_id: Option<ConnectionId>,
    state: SessionState,
    created_at: Instant,
    last_activity_at: Instant,
}

impl Session {
    /// Creates an `UNPAIRED` session whose only party is `connection_id`.
    pub fn open(role: Role, connection_id: ConnectionId) -> Self {
        let now = Instant::now();
        let mut session = Self {
            session_id: SessionId::new(),
            client_connection_id: None,
            supervisor_connection_id: None,
            state: SessionState::Unpaired,
            created_at: now,
            last_activity_at: now,
        };
        *session.slot_mut(role) = Some(connection_id);
        session
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn client_connection_id(&self) -> Option<ConnectionId> {
        self.client_connection_id
    }

    pub fn supervisor_connection_id(&self) -> Option<ConnectionId> {
        self.supervisor_connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    pub fn is_paired(&self) -> bool {
        self.state == SessionState::Paired
    }

    /// The connection occupying the slot for `role`, if any.
    pub fn connection_for(&self, role: Role) -> Option<ConnectionId> {
        match role {
            Role::Client => self.client_connection_id,
            Role::Supervisor => self.supervisor_connection_id,
        }
    }

    /// The role `connection_id` plays in this session, if it is a party.
    pub fn role_of(&self, connection_id: ConnectionId) -> Option<Role> {
        if self.client_connection_id == Some(connection_id) {
            Some(Role::Client)
        } else if self.supervisor_connection_id == Some(connection_id) {
            Some(Role::Supervisor)
        } else {
            None
        }
    }

    /// Returns the opposite slot of `requester`.
    ///
    /// `None` when the session is not paired or `requester` is not a party.
    pub fn other_party(&self, requester: ConnectionId) -> Option<ConnectionId> {
        if !self.is_paired() {
            return None;
        }
        self.role_of(requester)
            .and_then(|role| self.connection_for(role.counterpart()))
    }

    /// Iterates over the filled slots, client first.
    pub fn parties(&self) -> impl Iterator<Item = ConnectionId> {
        [self.client_connection_id, self.supervisor_connection_id]
            .into_iter()
            .flatten()
    }

    /// Places `connection_id` into the empty slot for `role`.
    ///
    /// Moves the session to `PAIRED` once both slots are filled.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Closed`] if the session already reached `CLOSED`.
    /// - [`SessionError::SlotOccupied`] if the slot is taken.
    pub fn join(&mut self, role: Role, connection_id: ConnectionId) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed(self.session_id));
        }
        let session_id = self.session_id;
        let slot = self.slot_mut(role);
        if slot.is_some() {
            return Err(SessionError::SlotOccupied { session_id, role });
        }
        *slot = Some(connection_id);

        if self.client_connection_id.is_some() && self.supervisor_connection_id.is_some() {
            self.state = SessionState::Paired;
        }
        self.touch(Instant::now());
        Ok(())
    }

    /// Records activity at `now`. Never moves `last_activity_at` backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    /// Moves the session to the terminal `CLOSED` state.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<ConnectionId> {
        match role {
            Role::Client => &mut self.client_connection_id,
            Role::Supervisor => &mut self.supervisor_connection_id,
        }
    }
}
