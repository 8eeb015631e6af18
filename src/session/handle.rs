//! Logical connection handles and the statements bound to them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

use super::physical::IsolationLevel;
use super::pooled::PooledSession;
use crate::error::{Error, Result};
use crate::executor::QueryResult;
use crate::port::SessionIdentity;

/// Liveness flag shared between a handle and the session that issued it.
#[derive(Debug)]
pub(crate) struct HandleState {
    active: AtomicBool,
}

impl HandleState {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
        }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true if this call did the deactivation.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

/// A connection handed out by a pool.
///
/// The handle borrows a physical session. Closing it returns the session to
/// its pool; the session itself stays open. A handle stops working once it is
/// closed or once the session issues a newer handle, after which every call
/// fails with [`Error::StaleHandle`].
pub struct LogicalConnection {
    session: PooledSession,
    state: Arc<HandleState>,
}

impl LogicalConnection {
    pub(crate) fn new(session: PooledSession, state: Arc<HandleState>) -> Self {
        Self { session, state }
    }

    /// Identity of the wrapped physical session.
    pub fn identity(&self) -> SessionIdentity {
        self.session.identity()
    }

    pub fn is_closed(&self) -> bool {
        !self.state.is_active()
    }

    /// Run one statement on the session.
    pub async fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.ensure_active()?;
        let result = self.session.lock().await.execute(sql).await;
        self.observe(result).await
    }

    /// Create a statement bound to this handle.
    pub fn create_statement(&self) -> Result<Statement<'_>> {
        self.ensure_active()?;
        Ok(Statement {
            conn: self,
            closed: false,
        })
    }

    pub async fn commit(&self) -> Result<()> {
        self.ensure_active()?;
        let result = self.session.lock().await.commit().await;
        self.observe(result).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.ensure_active()?;
        let result = self.session.lock().await.rollback().await;
        self.observe(result).await
    }

    pub async fn auto_commit(&self) -> Result<bool> {
        self.ensure_active()?;
        Ok(self.session.lock().await.auto_commit())
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.ensure_active()?;
        let result = self.session.lock().await.set_auto_commit(auto_commit).await;
        self.observe(result).await
    }

    pub async fn is_read_only(&self) -> Result<bool> {
        self.ensure_active()?;
        Ok(self.session.lock().await.is_read_only())
    }

    pub async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.ensure_active()?;
        self.session.lock().await.set_read_only(read_only);
        Ok(())
    }

    pub async fn transaction_isolation(&self) -> Result<IsolationLevel> {
        self.ensure_active()?;
        Ok(self.session.lock().await.transaction_isolation())
    }

    pub async fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.ensure_active()?;
        self.session.lock().await.set_transaction_isolation(level);
        Ok(())
    }

    pub async fn warnings(&self) -> Result<Vec<String>> {
        self.ensure_active()?;
        Ok(self.session.lock().await.warnings().to_vec())
    }

    pub async fn clear_warnings(&self) -> Result<()> {
        self.ensure_active()?;
        self.session.lock().await.clear_warnings();
        Ok(())
    }

    /// Give the session back to its pool. Closing twice is a no-op.
    ///
    /// Uncommitted work is rolled back first. If that rollback fails the
    /// session is still handed back and the failure is returned.
    pub async fn close(&self) -> Result<()> {
        if !self.state.is_active() {
            return Ok(());
        }
        self.session.release_handle(&self.state).await
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(Error::StaleHandle)
        }
    }

    /// Report fatal failures to the session's listeners before returning them.
    async fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.session.fire_error(e).await;
            }
        }
        result
    }
}

impl PartialEq for LogicalConnection {
    fn eq(&self, other: &Self) -> bool {
        self.session == other.session
    }
}

impl Eq for LogicalConnection {}

impl fmt::Display for LogicalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pooled connection wrapping physical connection {}", self.identity())
    }
}

impl fmt::Debug for LogicalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalConnection")
            .field("identity", &self.identity())
            .field("active", &self.state.is_active())
            .finish()
    }
}

impl Drop for LogicalConnection {
    fn drop(&mut self) {
        if !self.state.is_active() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(identity = %self.identity(), "connection handle dropped outside a runtime");
            return;
        };
        let session = self.session.clone();
        let state = Arc::clone(&self.state);
        runtime.spawn(async move {
            if let Err(e) = session.release_handle(&state).await {
                warn!(identity = %session.identity(), error = %e, "releasing dropped handle failed");
            }
        });
    }
}

/// A statement issued through a [`LogicalConnection`].
pub struct Statement<'c> {
    conn: &'c LogicalConnection,
    closed: bool,
}

impl<'c> Statement<'c> {
    /// The handle this statement was created from.
    pub fn connection(&self) -> &'c LogicalConnection {
        self.conn
    }

    pub async fn execute(&self, sql: &str) -> Result<QueryResult> {
        if self.closed {
            return Err(Error::Unexpected("statement is closed".to_string()));
        }
        self.conn.execute(sql).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}
