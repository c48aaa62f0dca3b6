//! FIFO pools of connections waiting for a counterpart.
//!
//! An arrival first looks at the *other* role's pool: if someone is waiting,
//! the oldest entry is popped and returned as the match.  Otherwise the
//! arrival joins the tail of its own pool.  Because every arrival drains the
//! opposite pool before queueing, at most one of the two pools is non-empty
//! at any time.
//!
//! The queue itself is not synchronized; [`SessionRegistry`] owns it and only
//! touches it inside its critical section, which makes "pop + pair" atomic.
//!
//! [`SessionRegistry`]: crate::application::session_registry::SessionRegistry

use std::collections::VecDeque;

use relay_core::{ConnectionId, Role};
use tracing::debug;

/// Outcome of an arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// The arrival was matched with this waiting counterpart.
    Paired(ConnectionId),
    /// Nobody was waiting; the arrival is now queued.
    Queued,
}

#[derive(Debug, Default)]
pub struct MatchingQueue {
    waiting_clients: VecDeque<ConnectionId>,
    waiting_supervisors: VecDeque<ConnectionId>,
}

impl MatchingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supervisor_arrives(&mut self, connection_id: ConnectionId) -> Match {
        self.arrive(Role::Supervisor, connection_id, |_| true)
    }

    pub fn client_arrives(&mut self, connection_id: ConnectionId) -> Match {
        self.arrive(Role::Client, connection_id, |_| true)
    }

    /// Matches `connection_id` with the longest-waiting counterpart for which
    /// `is_live` holds, or queues it.
    ///
    /// Counterparts rejected by `is_live` are dropped from the pool.
    pub fn arrive<F>(&mut self, role: Role, connection_id: ConnectionId, mut is_live: F) -> Match
    where
        F: FnMut(ConnectionId) -> bool,
    {
        let (counterparts, own) = self.pools_mut(role);

        while let Some(candidate) = counterparts.pop_front() {
            if candidate != connection_id && is_live(candidate) {
                return Match::Paired(candidate);
            }
            debug!(%candidate, "dropping stale entry from the {} pool", role.counterpart());
        }

        if !own.contains(&connection_id) {
            own.push_back(connection_id);
        }
        Match::Queued
    }

    /// Appends `connection_id` to its own pool without looking for a match.
    pub fn enqueue(&mut self, role: Role, connection_id: ConnectionId) {
        let (_, own) = self.pools_mut(role);
        if !own.contains(&connection_id) {
            own.push_back(connection_id);
        }
    }

    /// Removes `connection_id` from whichever pool holds it.
    ///
    /// Returns `true` if an entry was removed.
    pub fn withdraw(&mut self, connection_id: ConnectionId) -> bool {
        let before = self.waiting_clients.len() + self.waiting_supervisors.len();
        self.waiting_clients.retain(|id| *id != connection_id);
        self.waiting_supervisors.retain(|id| *id != connection_id);
        before != self.waiting_clients.len() + self.waiting_supervisors.len()
    }

    pub fn is_waiting(&self, connection_id: ConnectionId) -> bool {
        self.waiting_clients.contains(&connection_id)
            || self.waiting_supervisors.contains(&connection_id)
    }

    /// Number of connections of `role` currently waiting.
    pub fn waiting(&self, role: Role) -> usize {
        self.pool(role).len()
    }

    /// Waiting connections of `role`, oldest first.
    pub fn waiting_ids(&self, role: Role) -> Vec<ConnectionId> {
        self.pool(role).iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.waiting_clients.clear();
        self.waiting_supervisors.clear();
    }

    fn pool(&self, role: Role) -> &VecDeque<ConnectionId> {
        match role {
            Role::Client => &self.waiting_clients,
            Role::Supervisor => &self.waiting_supervisors,
        }
    }

    /// Returns `(counterpart pool, own pool)` for an arrival of `role`.
    fn pools_mut(
        &mut self,
        role: Role,
    ) -> (&mut VecDeque<ConnectionId>, &mut VecDeque<ConnectionId>) {
        match role {
            Role::Client => (&mut self.waiting_supervisors, &mut self.waiting_clients),
            Role::Supervisor => (&mut self.waiting_clients, &mut self.waiting_supervisors),
        }
    }
}
