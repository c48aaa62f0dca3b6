//! Concurrent pairing through the public `SessionRegistry` API.
//!
//! Many threads register and arrive at once.  Whatever the interleaving, the
//! end state must satisfy the pairing invariants:
//!
//! - every connection is bound to exactly one session,
//! - no session has two parties of the same role,
//! - at most one waiting pool is non-empty,
//! - a waiting connection is never part of a paired session.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use relay_core::{ConnectionId, Message, Role, SessionState, TransportKind};
use relay_server::application::connection::{Connection, ConnectionError, ConnectionInfo};
use relay_server::application::session_registry::{RegistrySnapshot, SessionRegistry};

/// A connection that is always open and discards everything.
struct NullConnection;

impl Connection for NullConnection {
    fn transport(&self) -> TransportKind {
        TransportKind::LegacySocket
    }
    fn send(&self, _: &Message) -> Result<(), ConnectionError> {
        Ok(())
    }
    fn announce_shutdown(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
    fn is_open(&self) -> bool {
        true
    }
    fn close(&self) {}
}

fn arrive(registry: &SessionRegistry, role: Role) -> ConnectionId {
    let connection_id = ConnectionId::new();
    registry.register_connection(ConnectionInfo::new(
        connection_id,
        format!("{role}-{connection_id}"),
        Arc::new(NullConnection),
    ));
    registry
        .create_or_join_session(connection_id, role)
        .expect("pairing must succeed for a fresh connection");
    connection_id
}

fn spawn_arrivals(
    registry: &Arc<SessionRegistry>,
    role: Role,
    threads: usize,
    per_thread: usize,
) -> Vec<thread::JoinHandle<Vec<ConnectionId>>> {
    (0..threads)
        .map(|_| {
            let registry = Arc::clone(registry);
            thread::spawn(move || (0..per_thread).map(|_| arrive(&registry, role)).collect())
        })
        .collect()
}

fn join_all(handles: Vec<thread::JoinHandle<Vec<ConnectionId>>>) -> Vec<ConnectionId> {
    handles
        .into_iter()
        .flat_map(|h| h.join().expect("arrival thread panicked"))
        .collect()
}

#[test]
fn test_balanced_concurrent_arrivals_pair_everyone() {
    // Arrange
    let registry = Arc::new(SessionRegistry::new());

    // Act: 8 threads of clients and 8 of supervisors, 25 arrivals each
    let clients = spawn_arrivals(&registry, Role::Client, 8, 25);
    let supervisors = spawn_arrivals(&registry, Role::Supervisor, 8, 25);
    let clients = join_all(clients);
    let supervisors = join_all(supervisors);

    // Assert
    assert_eq!(registry.waiting(Role::Client), 0);
    assert_eq!(registry.waiting(Role::Supervisor), 0);
    assert_eq!(registry.session_count(), 200);

    let sessions = registry.sessions();
    assert!(sessions.iter().all(|s| s.state() == SessionState::Paired));

    let mut seen = HashSet::new();
    for session in &sessions {
        let client = session.client_connection_id().expect("client slot");
        let supervisor = session.supervisor_connection_id().expect("supervisor slot");
        assert!(clients.contains(&client));
        assert!(supervisors.contains(&supervisor));
        assert!(seen.insert(client), "client {client} is in two sessions");
        assert!(seen.insert(supervisor), "supervisor {supervisor} is in two sessions");
    }
    assert_eq!(seen.len(), 400);
}

#[test]
fn test_unbalanced_arrivals_leave_surplus_waiting() {
    // Arrange
    let registry = Arc::new(SessionRegistry::new());

    // Act: 120 clients against 80 supervisors
    let clients = join_all(spawn_arrivals(&registry, Role::Client, 4, 30));
    let supervisors = join_all(spawn_arrivals(&registry, Role::Supervisor, 4, 20));

    // Assert
    assert_eq!(registry.waiting(Role::Supervisor), 0);
    assert_eq!(registry.waiting(Role::Client), 40);

    let sessions = registry.sessions();
    let paired = sessions.iter().filter(|s| s.is_paired()).count();
    assert_eq!(paired, supervisors.len());
    assert_eq!(sessions.len(), clients.len());

    for id in clients.iter().chain(supervisors.iter()) {
        let session = registry
            .get_session_by_connection_id(*id)
            .expect("every connection has a session");
        assert_ne!(session.state(), SessionState::Closed);
    }
}

#[test]
fn test_concurrent_removal_notifies_once() {
    // Arrange: pair one client and one supervisor
    let registry = Arc::new(SessionRegistry::new());
    let client = arrive(&registry, Role::Client);
    let supervisor = arrive(&registry, Role::Supervisor);
    let session_id = registry
        .get_session_by_connection_id(client)
        .expect("session")
        .session_id();

    // Act: several threads race to remove the same connection
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.remove_connection(supervisor).is_some())
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("remover panicked"))
        .filter(|won| *won)
        .count();

    // Assert
    assert_eq!(winners, 1);
    assert!(registry.get_session(session_id).is_none());
    assert!(registry.get_session_by_connection_id(client).is_none());
    assert_eq!(registry.connection_count(), 1);
}

/// Checks one snapshot: every waiting id sits alone in an UNPAIRED session
/// and no PAIRED session holds a waiting id.
fn assert_waiting_ids_are_unpaired(snapshot: &RegistrySnapshot) {
    assert!(
        snapshot.waiting_clients.is_empty() || snapshot.waiting_supervisors.is_empty(),
        "both pools have waiting connections"
    );

    let mut session_of = HashMap::new();
    for session in &snapshot.sessions {
        for party in session.parties() {
            session_of.insert(party, session);
        }
    }

    let waiting: HashSet<ConnectionId> = snapshot.waiting_ids().collect();
    for id in &waiting {
        let session = session_of
            .get(id)
            .unwrap_or_else(|| panic!("waiting connection {id} has no session"));
        assert_eq!(session.state(), SessionState::Unpaired, "waiting {id} is in a paired session");
    }
    for session in snapshot.sessions.iter().filter(|s| s.is_paired()) {
        assert!(
            session.parties().all(|party| !waiting.contains(&party)),
            "paired session {} holds a waiting connection",
            session.session_id()
        );
    }
}

#[test]
fn test_waiting_ids_never_appear_in_paired_sessions_mid_run() {
    // Arrange
    let registry = Arc::new(SessionRegistry::new());
    let done = Arc::new(AtomicBool::new(false));

    let observer = {
        let registry = Arc::clone(&registry);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut snapshots = 0usize;
            loop {
                assert_waiting_ids_are_unpaired(&registry.snapshot());
                snapshots += 1;
                if done.load(Ordering::Acquire) {
                    return snapshots;
                }
            }
        })
    };

    // Act: six threads interleave both roles, two clients for every supervisor
    let arrivals: Vec<thread::JoinHandle<Vec<(Role, ConnectionId)>>> = (0..6)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..60)
                    .map(|n| {
                        let role = if (t + n) % 3 == 0 {
                            Role::Supervisor
                        } else {
                            Role::Client
                        };
                        let id = arrive(&registry, role);
                        if n % 10 == 0 {
                            thread::yield_now();
                        }
                        (role, id)
                    })
                    .collect()
            })
        })
        .collect();
    let arrived: Vec<(Role, ConnectionId)> = arrivals
        .into_iter()
        .flat_map(|h| h.join().expect("arrival thread panicked"))
        .collect();
    done.store(true, Ordering::Release);
    let snapshots = observer.join().expect("observer panicked");

    // Assert
    let final_snapshot = registry.snapshot();
    assert_waiting_ids_are_unpaired(&final_snapshot);
    assert!(snapshots > 0);

    let clients = arrived.iter().filter(|(role, _)| *role == Role::Client).count();
    let supervisors = arrived.len() - clients;
    assert_eq!(final_snapshot.waiting_clients.len(), clients - supervisors);
    assert!(final_snapshot.waiting_supervisors.is_empty());
    assert_eq!(
        final_snapshot.sessions.iter().filter(|s| s.is_paired()).count(),
        supervisors
    );
}
