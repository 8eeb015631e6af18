//! Session lifecycle events delivered to pool managers.

use async_trait::async_trait;

use super::pooled::PooledSession;
use crate::port::SessionIdentity;

/// What happened to a pooled session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// The logical handle was closed normally
    Closed,
    /// The session hit an error that makes it unusable
    FatalError {
        sql_state: Option<String>,
        message: String,
    },
}

/// Notification sent to every registered listener.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub session: PooledSession,
    pub identity: SessionIdentity,
    pub kind: ConnectionEventKind,
}

impl ConnectionEvent {
    /// Status code of the triggering error, if this is an error event.
    pub fn sql_state(&self) -> Option<&str> {
        match &self.kind {
            ConnectionEventKind::FatalError { sql_state, .. } => sql_state.as_deref(),
            ConnectionEventKind::Closed => None,
        }
    }
}

/// Receives session lifecycle events, typically a connection pool.
#[async_trait]
pub trait ConnectionEventListener: Send + Sync {
    async fn connection_closed(&self, event: &ConnectionEvent);

    async fn connection_error_occurred(&self, event: &ConnectionEvent);
}
