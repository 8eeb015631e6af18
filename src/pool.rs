//! Connection pool.
//!
//! The pool owns a bounded set of physical sessions and hands out
//! [`LogicalConnection`]s on them. Every session lives in exactly one of two
//! collections, `available` or `in_use`; all decisions about them are taken
//! under one mutex that is never held across an `.await`. Sessions report back
//! through the event listener the pool registers on each of them.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::executor::SharedExecutor;
use crate::port::EndpointResolver;
use crate::registry::PoolRegistry;
use crate::session::{
    ConnectionEvent, ConnectionEventKind, ConnectionEventListener, LogicalConnection,
    PooledSession, Session,
};

/// Longest a waiting acquirer sleeps before re-checking the pool.
const WAKE_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Pool State
// ============================================================================

#[derive(Default)]
struct PoolState {
    available: Vec<PooledSession>,
    in_use: Vec<PooledSession>,
    /// Slots reserved by acquirers that are still opening a session
    pending: usize,
    closed: bool,
}

impl PoolState {
    fn take_in_use(&mut self, session: &PooledSession) -> Option<PooledSession> {
        let pos = self.in_use.iter().position(|s| s == session)?;
        Some(self.in_use.swap_remove(pos))
    }

    fn take_available(&mut self, session: &PooledSession) -> Option<PooledSession> {
        let pos = self.available.iter().position(|s| s == session)?;
        Some(self.available.swap_remove(pos))
    }
}

enum Checkout {
    Ready(PooledSession),
    Create,
    Wait,
}

struct PoolInner {
    config: PoolConfig,
    executor: SharedExecutor,
    state: Mutex<PoolState>,
    /// Signalled whenever a slot may have become free
    released: Notify,
    listener: Arc<dyn ConnectionEventListener>,
}

/// Returns sessions to the pool when their handles report back.
struct PoolListener {
    pool: Weak<PoolInner>,
}

#[async_trait]
impl ConnectionEventListener for PoolListener {
    async fn connection_closed(&self, event: &ConnectionEvent) {
        if let Some(inner) = self.pool.upgrade() {
            ConnectionPool { inner }.release(&event.session).await;
        }
    }

    async fn connection_error_occurred(&self, event: &ConnectionEvent) {
        if let Some(inner) = self.pool.upgrade() {
            ConnectionPool { inner }.evict(event).await;
        }
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

/// A pool of server sessions.
///
/// Cloning yields another reference to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open a pool, warm it with `initial_connections` sessions and publish
    /// it in the registry when it has a name.
    pub async fn connect(config: PoolConfig, executor: SharedExecutor) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new_cyclic(|weak: &Weak<PoolInner>| PoolInner {
            config,
            executor,
            state: Mutex::new(PoolState::default()),
            released: Notify::new(),
            listener: Arc::new(PoolListener { pool: weak.clone() }),
        });
        let pool = Self { inner };

        for _ in 0..pool.inner.config.initial_connections {
            match pool.create_session().await {
                Ok(session) => pool.inner.state.lock().available.push(session),
                Err(e) => {
                    pool.close().await;
                    return Err(e);
                }
            }
        }

        if let Some(name) = &pool.inner.config.name {
            PoolRegistry::global().register(name, pool.clone());
        }

        info!(
            host = %pool.inner.config.host,
            port = pool.inner.config.port,
            database = %pool.inner.config.database,
            max = pool.inner.config.max_connections,
            initial = pool.inner.config.initial_connections,
            "connection pool opened"
        );
        Ok(pool)
    }

    /// Find a pool published under `name`.
    pub fn lookup(name: &str) -> Option<ConnectionPool> {
        PoolRegistry::global().lookup(name)
    }

    /// Get a connection handle.
    ///
    /// Reuses an available session, opens a new one while capacity remains,
    /// or waits for a release. Waiting gives up with [`Error::LockTimeout`]
    /// after the configured login timeout; a timeout of 0 waits forever.
    pub async fn acquire(&self) -> Result<LogicalConnection> {
        let timeout = Duration::from_secs(self.inner.config.login_timeout_secs);
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.checkout()? {
                Checkout::Ready(session) => {
                    debug!(identity = %session.identity(), "reusing pooled session");
                    return self.hand_out(session).await;
                }
                Checkout::Create => return self.grow(Reservation::new(self)).await,
                Checkout::Wait => {}
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::LockTimeout(timeout));
                    }
                    (deadline - now).min(WAKE_INTERVAL)
                }
                None => WAKE_INTERVAL,
            };
            // Elapsed just means it is time to re-check
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    fn checkout(&self) -> Result<Checkout> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::Unexpected("connection pool is closed".to_string()));
        }

        while let Some(session) = state.available.pop() {
            if session.is_closed() {
                continue;
            }
            state.in_use.push(session.clone());
            return Ok(Checkout::Ready(session));
        }

        let max = self.inner.config.max_connections as usize;
        if max == 0 || state.in_use.len() + state.pending < max {
            state.pending += 1;
            return Ok(Checkout::Create);
        }
        Ok(Checkout::Wait)
    }

    /// Open a session on a reserved slot and hand out a handle on it.
    async fn grow(&self, reservation: Reservation<'_>) -> Result<LogicalConnection> {
        let created = self.create_session().await;

        let session = {
            let mut state = self.inner.state.lock();
            reservation.settle(&mut state);
            match created {
                Ok(session) if !state.closed => {
                    state.in_use.push(session.clone());
                    Ok(session)
                }
                Ok(session) => Err(session),
                Err(e) => {
                    drop(state);
                    self.inner.released.notify_one();
                    return Err(e);
                }
            }
        };

        match session {
            Ok(session) => self.hand_out(session).await,
            Err(orphan) => {
                orphan.close().await;
                Err(Error::Unexpected("connection pool is closed".to_string()))
            }
        }
    }

    /// Issue a handle on a session already counted in `in_use`.
    async fn hand_out(&self, session: PooledSession) -> Result<LogicalConnection> {
        let mut handout = Handout {
            pool: self,
            session: Some(session.clone()),
        };
        let handle = session.get_connection().await;
        handout.session = None;
        handle
    }

    /// Close a session off the caller's task.
    fn discard_later(&self, session: PooledSession) {
        session.remove_connection_event_listener(&self.inner.listener);
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { session.close().await });
            }
            Err(_) => warn!(identity = %session.identity(), "session dropped outside a runtime"),
        }
    }

    async fn create_session(&self) -> Result<PooledSession> {
        let config = &self.inner.config;
        let session = Session::establish(
            EndpointResolver::global(),
            config,
            Arc::clone(&self.inner.executor),
        )
        .await?;

        let pooled = PooledSession::new(session, config.auto_commit);
        pooled.add_connection_event_listener(Arc::clone(&self.inner.listener));
        debug!(identity = %pooled.identity(), "pooled session created");
        Ok(pooled)
    }

    /// Take back a session whose handle was closed.
    async fn release(&self, session: &PooledSession) {
        let discard = {
            let mut state = self.inner.state.lock();
            let Some(session) = state.take_in_use(session) else {
                return;
            };
            if !state.closed && self.inner.config.is_bounded() {
                state.available.push(session);
                None
            } else {
                Some(session)
            }
        };

        if let Some(session) = discard {
            debug!(identity = %session.identity(), "discarding session");
            session.remove_connection_event_listener(&self.inner.listener);
            session.close().await;
        }
        self.inner.released.notify_one();
    }

    /// Drop a session that reported a fatal error.
    async fn evict(&self, event: &ConnectionEvent) {
        let evicted = {
            let mut state = self.inner.state.lock();
            state
                .take_in_use(&event.session)
                .or_else(|| state.take_available(&event.session))
        };
        let Some(session) = evicted else {
            return;
        };

        if let ConnectionEventKind::FatalError { sql_state, message } = &event.kind {
            warn!(
                identity = %event.identity,
                sql_state = sql_state.as_deref().unwrap_or("none"),
                error = %message,
                "evicting session after fatal error"
            );
        }
        session.remove_connection_event_listener(&self.inner.listener);
        session.close().await;
        self.inner.released.notify_one();
    }

    /// Close every session and wake all waiters. Closing twice is a no-op.
    pub async fn close(&self) {
        let sessions = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut sessions = std::mem::take(&mut state.available);
            sessions.append(&mut state.in_use);
            sessions
        };

        for session in sessions {
            session.remove_connection_event_listener(&self.inner.listener);
            session.close().await;
        }
        self.inner.released.notify_waiters();

        if let Some(name) = &self.inner.config.name {
            PoolRegistry::global().remove(name, self);
        }
        info!(database = %self.inner.config.database, "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Sessions waiting to be handed out.
    pub fn available_count(&self) -> usize {
        self.inner.state.lock().available.len()
    }

    /// Sessions currently lent out.
    pub fn in_use_count(&self) -> usize {
        self.inner.state.lock().in_use.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

/// A slot counted in `pending` while its session is being opened.
///
/// Dropping an unsettled reservation gives the slot back, so an acquirer
/// cancelled mid-handshake cannot shrink the pool.
struct Reservation<'a> {
    pool: &'a ConnectionPool,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(pool: &'a ConnectionPool) -> Self {
        Self { pool, armed: true }
    }

    /// Account for the slot under an already held lock.
    fn settle(mut self, state: &mut PoolState) {
        state.pending -= 1;
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.pool.inner.state.lock().pending -= 1;
        self.pool.inner.released.notify_one();
    }
}

/// A session moved to `in_use` whose handle has not been issued yet.
///
/// If the acquirer goes away first the session is taken back out of `in_use`
/// and closed, since a reset cut short leaves it in an unknown state.
struct Handout<'a> {
    pool: &'a ConnectionPool,
    session: Option<PooledSession>,
}

impl Drop for Handout<'_> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let taken = self.pool.inner.state.lock().take_in_use(&session);
        if let Some(session) = taken {
            debug!(identity = %session.identity(), "acquire cancelled, discarding session");
            self.pool.discard_later(session);
        }
        self.pool.inner.released.notify_one();
    }
}

impl PartialEq for ConnectionPool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ConnectionPool {}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionPool")
            .field("database", &self.inner.config.database)
            .field("available", &state.available.len())
            .field("in_use", &state.in_use.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests;
