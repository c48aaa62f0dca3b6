//! SessionRegistry: the single owner of connections, sessions, and the
//! matching queue.
//!
//! # Shared state (for beginners)
//!
//! Every connection task holds an `Arc<SessionRegistry>`.  All four indices
//! live in one [`RegistryState`] behind one `parking_lot::Mutex`, and every
//! public method takes the lock exactly once.  That single critical section
//! is what makes pairing atomic: two supervisors arriving at the same time
//! are serialized, so they can never both pop the same waiting client.
//!
//! The lock is never held while writing to a socket.  Lookups hand out clones
//! (`ConnectionInfo` is an `Arc` handle plus a name, `Session` is plain data)
//! and the caller sends outside the lock.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use relay_core::{ConnectionId, Role, Session, SessionError, SessionId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::connection::ConnectionInfo;
use crate::application::matching_queue::{Match, MatchingQueue};

/// Errors from the pairing path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("connection {connection_id} already belongs to session {session_id}")]
    AlreadyInSession {
        connection_id: ConnectionId,
        session_id: SessionId,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The session a removed connection belonged to, after teardown.
#[derive(Debug, Clone)]
pub struct SessionTeardown {
    /// Final snapshot, in state `CLOSED`.
    pub session: Session,
    /// The other party, if it is still registered.
    pub other_party: Option<ConnectionInfo>,
}

/// Result of [`SessionRegistry::remove_connection`].
#[derive(Debug, Clone)]
pub struct RemovedConnection {
    pub connection: ConnectionInfo,
    pub teardown: Option<SessionTeardown>,
}

/// A consistent view of the waiting pools and live sessions, taken under
/// one lock.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub waiting_clients: Vec<ConnectionId>,
    pub waiting_supervisors: Vec<ConnectionId>,
    pub sessions: Vec<Session>,
}

impl RegistrySnapshot {
    /// Every waiting id, clients first.
    pub fn waiting_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.waiting_clients
            .iter()
            .chain(self.waiting_supervisors.iter())
            .copied()
    }
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionInfo>,
    sessions: HashMap<SessionId, Session>,
    session_by_connection: HashMap<ConnectionId, SessionId>,
    queue: MatchingQueue,
}

impl RegistryState {
    /// Closes `session_id` and unlinks both parties. `None` if unknown.
    fn close_session(&mut self, session_id: SessionId) -> Option<Session> {
        let mut session = self.sessions.remove(&session_id)?;
        for party in session.parties() {
            self.session_by_connection.remove(&party);
            self.queue.withdraw(party);
        }
        session.close();
        Some(session)
    }

    fn open_session(&mut self, role: Role, connection_id: ConnectionId) -> Session {
        let session = Session::open(role, connection_id);
        self.session_by_connection
            .insert(connection_id, session.session_id());
        self.sessions.insert(session.session_id(), session.clone());
        session
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `info` into the connection index and returns its id.
    ///
    /// The connection belongs to no session until
    /// [`create_or_join_session`](Self::create_or_join_session) is called.
    pub fn register_connection(&self, info: ConnectionInfo) -> ConnectionId {
        let connection_id = info.connection_id;
        debug!(
            %connection_id,
            name = %info.display_name,
            transport = %info.transport(),
            "registering connection"
        );
        self.state.lock().connections.insert(connection_id, info);
        connection_id
    }

    /// Looks up a registered connection. Closed handles are reported as absent.
    pub fn get_connection(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        self.state
            .lock()
            .connections
            .get(&connection_id)
            .filter(|info| info.is_open())
            .cloned()
    }

    pub fn get_session(&self, session_id: SessionId) -> Option<Session> {
        self.state.lock().sessions.get(&session_id).cloned()
    }

    pub fn get_session_by_connection_id(&self, connection_id: ConnectionId) -> Option<Session> {
        let state = self.state.lock();
        state
            .session_by_connection
            .get(&connection_id)
            .and_then(|session_id| state.sessions.get(session_id))
            .cloned()
    }

    /// Pairs `connection_id` with the longest-waiting counterpart of the
    /// opposite role, or opens a new `UNPAIRED` session and queues it.
    ///
    /// Waiting counterparts whose connection has closed are skipped.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownConnection`] if the id was never registered
    ///   or has been removed.
    /// - [`RegistryError::AlreadyInSession`] if the connection is already
    ///   bound to a session.
    pub fn create_or_join_session(
        &self,
        connection_id: ConnectionId,
        role: Role,
    ) -> Result<Session, RegistryError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.connections.contains_key(&connection_id) {
            return Err(RegistryError::UnknownConnection(connection_id));
        }
        if let Some(session_id) = state.session_by_connection.get(&connection_id) {
            return Err(RegistryError::AlreadyInSession {
                connection_id,
                session_id: *session_id,
            });
        }

        let connections = &state.connections;
        let session_by_connection = &state.session_by_connection;
        let outcome = state.queue.arrive(role, connection_id, |candidate| {
            session_by_connection.contains_key(&candidate)
                && connections
                    .get(&candidate)
                    .is_some_and(ConnectionInfo::is_open)
        });

        match outcome {
            Match::Paired(counterpart) => {
                let session = state
                    .session_by_connection
                    .get(&counterpart)
                    .and_then(|session_id| state.sessions.get_mut(session_id));
                let Some(session) = session else {
                    warn!(%counterpart, "waiting counterpart lost its session; opening a new one");
                    let session = state.open_session(role, connection_id);
                    state.queue.enqueue(role, connection_id);
                    return Ok(session);
                };
                session.join(role, connection_id)?;
                let session = session.clone();
                state
                    .session_by_connection
                    .insert(connection_id, session.session_id());
                info!(
                    session_id = %session.session_id(),
                    %connection_id,
                    %counterpart,
                    "{role} paired with waiting {}",
                    role.counterpart()
                );
                Ok(session)
            }
            Match::Queued => {
                let session = state.open_session(role, connection_id);
                info!(
                    session_id = %session.session_id(),
                    %connection_id,
                    "{role} waiting for a {}",
                    role.counterpart()
                );
                Ok(session)
            }
        }
    }

    pub fn client_arrives(&self, connection_id: ConnectionId) -> Result<Session, RegistryError> {
        self.create_or_join_session(connection_id, Role::Client)
    }

    pub fn supervisor_arrives(&self, connection_id: ConnectionId) -> Result<Session, RegistryError> {
        self.create_or_join_session(connection_id, Role::Supervisor)
    }

    /// Drops `connection_id` from the waiting pools. No-op if it is not waiting.
    pub fn withdraw(&self, connection_id: ConnectionId) -> bool {
        self.state.lock().queue.withdraw(connection_id)
    }

    pub fn is_waiting(&self, connection_id: ConnectionId) -> bool {
        self.state.lock().queue.is_waiting(connection_id)
    }

    /// Number of connections of `role` waiting for a counterpart.
    pub fn waiting(&self, role: Role) -> usize {
        self.state.lock().queue.waiting(role)
    }

    /// Waiting connections of `role`, oldest first.
    pub fn waiting_ids(&self, role: Role) -> Vec<ConnectionId> {
        self.state.lock().queue.waiting_ids(role)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock();
        RegistrySnapshot {
            waiting_clients: state.queue.waiting_ids(Role::Client),
            waiting_supervisors: state.queue.waiting_ids(Role::Supervisor),
            sessions: state.sessions.values().cloned().collect(),
        }
    }

    /// The opposite slot of `requester` in `session`; `None` while unpaired.
    pub fn get_other_party_connection_id(
        &self,
        session: &Session,
        requester: ConnectionId,
    ) -> Option<ConnectionId> {
        session.other_party(requester)
    }

    /// Bumps `last_activity_at` of a live session. Never changes its state.
    pub fn update_session_activity(&self, session_id: SessionId) {
        if let Some(session) = self.state.lock().sessions.get_mut(&session_id) {
            session.touch(Instant::now());
        }
    }

    /// Closes a session and releases both of its slots. Idempotent.
    ///
    /// Returns the final snapshot the first time, `None` afterwards.
    pub fn close_session(&self, session_id: SessionId) -> Option<Session> {
        let closed = self.state.lock().close_session(session_id);
        if closed.is_some() {
            info!(%session_id, "session closed");
        }
        closed
    }

    /// Removes a connection from every index and closes its session.
    ///
    /// Exactly one caller observes `Some` for a given id; repeated or
    /// concurrent calls get `None`, so the disconnect notice derived from the
    /// returned teardown is sent once.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> Option<RemovedConnection> {
        let mut state = self.state.lock();
        let connection = state.connections.remove(&connection_id)?;
        state.queue.withdraw(connection_id);

        let teardown = state
            .session_by_connection
            .get(&connection_id)
            .copied()
            .and_then(|session_id| state.close_session(session_id))
            .map(|session| {
                let other_party = session
                    .parties()
                    .find(|party| *party != connection_id)
                    .and_then(|party| state.connections.get(&party).cloned());
                SessionTeardown {
                    session,
                    other_party,
                }
            });
        drop(state);

        debug!(
            %connection_id,
            session_closed = teardown.is_some(),
            "connection removed"
        );
        Some(RemovedConnection {
            connection,
            teardown,
        })
    }

    /// Empties the registry and returns every connection that was registered.
    pub fn drain(&self) -> Vec<ConnectionInfo> {
        let mut state = self.state.lock();
        state.sessions.clear();
        state.session_by_connection.clear();
        state.queue.clear();
        state.connections.drain().map(|(_, info)| info).collect()
    }

    /// Snapshot of every live session.
    pub fn sessions(&self) -> Vec<Session> {
        self.state.lock().sessions.values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }
}
