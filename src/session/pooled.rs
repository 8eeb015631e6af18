//! A physical session as seen by a pool: hands out handles, reports events.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::events::{ConnectionEvent, ConnectionEventKind, ConnectionEventListener};
use super::handle::{HandleState, LogicalConnection};
use super::physical::Session;
use crate::error::{Error, Result};
use crate::port::SessionIdentity;

struct SessionShared {
    identity: SessionIdentity,
    session: tokio::sync::Mutex<Session>,
    /// Handle most recently issued, if still tracked
    current: Mutex<Option<Arc<HandleState>>>,
    listeners: Mutex<Vec<Arc<dyn ConnectionEventListener>>>,
    default_auto_commit: bool,
    closed: AtomicBool,
}

/// A physical session that issues at most one live [`LogicalConnection`].
///
/// Cloning is cheap and yields another reference to the same session.
#[derive(Clone)]
pub struct PooledSession {
    shared: Arc<SessionShared>,
}

impl PooledSession {
    pub fn new(session: Session, default_auto_commit: bool) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                identity: session.identity(),
                session: tokio::sync::Mutex::new(session),
                current: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                default_auto_commit,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn identity(&self) -> SessionIdentity {
        self.shared.identity
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Issue a fresh handle.
    ///
    /// The previous handle, if any, stops working. Uncommitted work is rolled
    /// back and the configured auto-commit mode is restored. Any failure is
    /// reported to listeners as fatal.
    pub async fn get_connection(&self) -> Result<LogicalConnection> {
        if self.is_closed() {
            let err = Error::Unexpected("pooled session is closed".to_string());
            self.fire_error(&err).await;
            return Err(err);
        }

        if let Some(previous) = self.shared.current.lock().take() {
            previous.deactivate();
        }

        if let Err(e) = self.reset().await {
            self.fire_error(&e).await;
            return Err(e);
        }

        let state = Arc::new(HandleState::new());
        *self.shared.current.lock() = Some(Arc::clone(&state));
        debug!(identity = %self.shared.identity, "handle issued");
        Ok(LogicalConnection::new(self.clone(), state))
    }

    async fn reset(&self) -> Result<()> {
        let mut session = self.shared.session.lock().await;
        if !session.auto_commit() {
            session.rollback().await?;
        }
        session.clear_warnings();
        session.reset_auto_commit(self.shared.default_auto_commit);
        Ok(())
    }

    /// End `handle`'s use of the session.
    ///
    /// Open work is rolled back and warnings are cleared before listeners
    /// hear about the close. A failed rollback is returned afterwards; a fatal
    /// one is reported as an error event instead, so the session is evicted
    /// rather than recycled. Only the call that deactivates the handle fires.
    pub(crate) async fn release_handle(&self, handle: &HandleState) -> Result<()> {
        let ended = {
            let mut session = self.shared.session.lock().await;
            if !handle.is_active() {
                return Ok(());
            }
            let ended = if session.auto_commit() || session.is_closed() {
                Ok(())
            } else {
                session.rollback().await
            };
            session.clear_warnings();
            ended
        };

        if !handle.deactivate() {
            return Ok(());
        }
        match ended {
            Err(e) if e.is_fatal() => {
                self.fire_error(&e).await;
                Err(e)
            }
            ended => {
                self.fire_closed().await;
                ended
            }
        }
    }

    /// Close the physical session. Closing twice is harmless.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(current) = self.shared.current.lock().take() {
            current.deactivate();
        }

        let mut session = self.shared.session.lock().await;
        if !session.auto_commit() {
            if let Err(e) = session.rollback().await {
                warn!(identity = %self.shared.identity, error = %e, "rollback on close failed");
            }
        }
        session.close().await;
    }

    pub fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.shared.listeners.lock().push(listener);
    }

    pub fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.shared
            .listeners
            .lock()
            .retain(|l| Arc::as_ptr(l) as *const () != target);
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.shared.session.lock().await
    }

    pub(crate) async fn fire_closed(&self) {
        let event = self.event(ConnectionEventKind::Closed);
        for listener in self.listeners() {
            listener.connection_closed(&event).await;
        }
    }

    pub(crate) async fn fire_error(&self, error: &Error) {
        let event = self.event(ConnectionEventKind::FatalError {
            sql_state: error.sql_state().map(str::to_string),
            message: error.to_string(),
        });
        for listener in self.listeners() {
            listener.connection_error_occurred(&event).await;
        }
    }

    fn event(&self, kind: ConnectionEventKind) -> ConnectionEvent {
        ConnectionEvent {
            session: self.clone(),
            identity: self.shared.identity,
            kind,
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn ConnectionEventListener>> {
        self.shared.listeners.lock().clone()
    }
}

impl PartialEq for PooledSession {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for PooledSession {}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("identity", &self.shared.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
