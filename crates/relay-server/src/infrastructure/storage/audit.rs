//! Audit sink backed by `tracing`.

use relay_core::{Message, TransportKind};
use tracing::info;

use crate::application::message_router::{AuditError, AuditStore};

/// Records relayed messages as `tracing` events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditStore;

impl AuditStore for TracingAuditStore {
    fn save_message(&self, message: &Message, transport: TransportKind) -> Result<(), AuditError> {
        let payload =
            serde_json::to_string(&message.payload).map_err(|e| AuditError(e.to_string()))?;
        let session_id = message
            .session_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        info!(
            target: "audit",
            session_id = %session_id,
            from = %message.from,
            message_type = ?message.message_type,
            transport = transport.audit_tag(),
            timestamp = message.timestamp,
            payload = %payload,
            "message relayed"
        );
        Ok(())
    }
}
