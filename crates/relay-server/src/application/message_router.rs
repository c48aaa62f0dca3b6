//! MessageRouter: delivers messages between the two parties of a session.
//!
//! The router never holds the registry lock while sending.  It resolves the
//! sender's session and the peer's handle through [`SessionRegistry`] (each
//! lookup is its own short critical section) and then calls
//! [`Connection::send`], which only enqueues.
//!
//! Routing failures are answered with an `ERROR` message to the sender; the
//! boolean results exist for callers that want to log or count them.
//!
//! [`Connection::send`]: crate::application::connection::Connection::send

use std::sync::Arc;

use relay_core::{ConnectionId, Message, SessionId, TransportKind, SERVER_SENDER};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::connection::ConnectionInfo;
use crate::application::session_registry::{RemovedConnection, SessionRegistry};

pub const NOT_IN_SESSION: &str = "Not in an active session";
pub const NOT_PAIRED: &str = "Session not paired yet, waiting for other party";
pub const RECIPIENT_OFFLINE: &str = "Recipient is offline";
pub const OTHER_PARTY_DISCONNECTED: &str = "Other party disconnected";
pub const SESSION_PAIRED: &str = "Session paired";
pub const WAITING_FOR_OTHER_PARTY: &str = "Waiting for other party";

#[derive(Debug, Error)]
#[error("audit storage failed: {0}")]
pub struct AuditError(pub String);

/// Durable record of relayed messages.
///
/// Called for every message the router hands to a connection, whether or not
/// the send succeeded. Failures are logged by the router and never change the
/// delivery result.
#[cfg_attr(test, mockall::automock)]
pub trait AuditStore: Send + Sync {
    fn save_message(&self, message: &Message, transport: TransportKind) -> Result<(), AuditError>;
}

pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    audit: Arc<dyn AuditStore>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>, audit: Arc<dyn AuditStore>) -> Self {
        Self { registry, audit }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Relays `message` from `sender` to the other party of its session.
    ///
    /// The message is stamped with the sender's session id before delivery.
    /// Returns `true` if the peer's connection accepted it.
    ///
    /// A peer whose handle has closed but which has not been removed yet gets
    /// the sender a "Recipient is offline" error.  Once
    /// [`remove_connection`](Self::remove_connection) has run for the peer,
    /// the session is closed and the sender gets "Not in an active session".
    pub fn route_message(&self, sender: ConnectionId, mut message: Message) -> bool {
        let Some(session) = self.registry.get_session_by_connection_id(sender) else {
            debug!(%sender, "message from a connection without a session");
            self.send_error_to_connection(sender, NOT_IN_SESSION);
            return false;
        };
        let session_id = session.session_id();

        let Some(recipient_id) = self.registry.get_other_party_connection_id(&session, sender)
        else {
            debug!(%sender, %session_id, "message before pairing");
            self.send_error_to_connection(sender, NOT_PAIRED);
            return false;
        };

        let Some(recipient) = self.registry.get_connection(recipient_id) else {
            debug!(%sender, %recipient_id, "recipient is gone");
            self.send_error_to_connection(sender, RECIPIENT_OFFLINE);
            return false;
        };

        message.session_id = Some(session_id);
        let delivered = self.send_message_to_connection(&recipient, &message);
        if delivered {
            self.registry.update_session_activity(session_id);
        }
        delivered
    }

    /// Hands `message` to `connection` and records it in audit storage.
    ///
    /// Returns whether the connection accepted the message; an audit failure
    /// is logged and does not affect the result.
    pub fn send_message_to_connection(&self, connection: &ConnectionInfo, message: &Message) -> bool {
        let transport = connection.transport();
        let delivered = match connection.handle.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    connection_id = %connection.connection_id,
                    %transport,
                    "send failed: {e}"
                );
                false
            }
        };

        if let Err(e) = self.audit.save_message(message, transport) {
            warn!(connection_id = %connection.connection_id, "{e}");
        }
        delivered
    }

    /// Sends `message` to every party of the session. Returns how many
    /// connections accepted it.
    pub fn broadcast_to_session(&self, session_id: SessionId, message: &Message) -> usize {
        let Some(session) = self.registry.get_session(session_id) else {
            debug!(%session_id, "broadcast to unknown session");
            return 0;
        };
        session
            .parties()
            .filter_map(|party| self.registry.get_connection(party))
            .filter(|connection| self.send_message_to_connection(connection, message))
            .count()
    }

    /// Tells both parties that their session is now paired.
    pub fn announce_pairing(&self, session_id: SessionId) -> usize {
        let notice = Message::text(Some(session_id), SERVER_SENDER, SESSION_PAIRED);
        self.broadcast_to_session(session_id, &notice)
    }

    /// Sends a `DISCONNECT` notice to the other party of
    /// `disconnected`'s session, if there is one.
    ///
    /// Leaves the registry untouched.  The transport handlers disconnect
    /// through [`remove_connection`](Self::remove_connection), which sends
    /// the same notice once the session is torn down.
    pub fn notify_disconnect(&self, disconnected: ConnectionId) -> bool {
        let Some(session) = self.registry.get_session_by_connection_id(disconnected) else {
            return false;
        };
        let Some(other) = session.other_party(disconnected) else {
            return false;
        };
        let Some(connection) = self.registry.get_connection(other) else {
            return false;
        };
        self.send_disconnect(&connection, session.session_id())
    }

    /// The disconnect path shared by every transport.
    ///
    /// Tears the connection out of the registry and notifies the other party
    /// of its session. The registry hands the teardown to exactly one caller,
    /// so the notification is sent at most once.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> Option<RemovedConnection> {
        let removed = self.registry.remove_connection(connection_id)?;
        if let Some(teardown) = &removed.teardown {
            let session_id = teardown.session.session_id();
            info!(%connection_id, %session_id, "party left; session closed");
            if let Some(peer) = teardown.other_party.as_ref().filter(|p| p.is_open()) {
                self.send_disconnect(peer, session_id);
            }
        }
        Some(removed)
    }

    /// Sends an `ERROR` notice to `connection_id`. Not audited.
    pub fn send_error_to_connection(&self, connection_id: ConnectionId, reason: &str) -> bool {
        let Some(connection) = self.registry.get_connection(connection_id) else {
            return false;
        };
        let session_id = self
            .registry
            .get_session_by_connection_id(connection_id)
            .map(|s| s.session_id());
        match connection.handle.send(&Message::error(session_id, reason)) {
            Ok(()) => true,
            Err(e) => {
                warn!(%connection_id, "could not deliver error notice: {e}");
                false
            }
        }
    }

    /// Drains the registry, announces shutdown on every connection, and
    /// closes them. Returns how many announcements were queued.
    pub fn shutdown(&self) -> usize {
        let connections = self.registry.drain();
        let mut announced = 0;
        for connection in connections {
            match connection.handle.announce_shutdown() {
                Ok(()) => announced += 1,
                Err(e) => debug!(
                    connection_id = %connection.connection_id,
                    "shutdown notice not queued: {e}"
                ),
            }
            connection.handle.close();
        }
        announced
    }

    fn send_disconnect(&self, peer: &ConnectionInfo, session_id: SessionId) -> bool {
        let notice = Message::disconnect(Some(session_id), OTHER_PARTY_DISCONNECTED);
        self.send_message_to_connection(peer, &notice)
    }
}
