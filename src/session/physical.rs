//! A physical session: an open port plus a server-side session on it.

use std::fmt;

use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::executor::{QueryResult, SharedExecutor};
use crate::port::{
    Endpoint, EndpointResolver, Object, Request, SessionIdentity, WireConnection, SLAVE_ID_ANY,
};

/// Transaction isolation requested for new transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// No explicit level; the server default applies
    #[default]
    None,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    UsingSnapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::None => "NONE",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::UsingSnapshot => "USING SNAPSHOT",
        };
        f.write_str(name)
    }
}

/// One authenticated server session over its own socket.
pub struct Session {
    port: WireConnection,
    session_id: i32,
    executor: SharedExecutor,
    auto_commit: bool,
    read_only: bool,
    isolation: IsolationLevel,
    warnings: Vec<String>,
    closed: bool,
}

impl Session {
    /// Open a port and begin a session on the configured database.
    pub async fn establish(
        resolver: &EndpointResolver,
        config: &PoolConfig,
        executor: SharedExecutor,
    ) -> Result<Self> {
        let endpoint = Endpoint::new(&config.host, config.port);
        let mut port = WireConnection::open(
            resolver,
            &endpoint,
            config.protocol_version,
            config.authorization,
            SLAVE_ID_ANY,
        )
        .await?;

        match begin_session(&mut port, config).await {
            Ok(session_id) => {
                debug!(identity = %port.identity(), session_id, "session established");
                Ok(Self {
                    port,
                    session_id,
                    executor,
                    auto_commit: true,
                    read_only: false,
                    isolation: IsolationLevel::None,
                    warnings: Vec::new(),
                    closed: false,
                })
            }
            Err(e) => {
                port.close().await;
                Err(e)
            }
        }
    }

    pub fn identity(&self) -> SessionIdentity {
        self.port.identity()
    }

    /// Server-side session id.
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run one statement through the executor.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.ensure_open()?;
        self.executor
            .execute(&mut self.port, self.session_id, sql)
            .await
    }

    /// Commit the current transaction when auto-commit is off.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.auto_commit {
            self.execute("COMMIT").await?;
        }
        Ok(())
    }

    /// Roll back the current transaction when auto-commit is off.
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.auto_commit {
            self.execute("ROLLBACK").await?;
        }
        Ok(())
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Change auto-commit mode. Switching it on commits pending work first.
    pub async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        self.ensure_open()?;
        if auto_commit && !self.auto_commit {
            self.execute("COMMIT").await?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    /// Set the mode without touching the server; the caller has already ended
    /// any open transaction.
    pub(crate) fn reset_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn transaction_isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn set_transaction_isolation(&mut self, level: IsolationLevel) {
        self.isolation = level;
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    /// End the server session and close the socket. Safe to call twice.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = end_session(&mut self.port, self.session_id).await {
            warn!(identity = %self.port.identity(), error = %e, "end session failed");
        }
        self.port.close().await;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Unexpected("session is closed".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.port.identity())
            .field("session_id", &self.session_id)
            .field("auto_commit", &self.auto_commit)
            .field("closed", &self.closed)
            .finish()
    }
}

async fn begin_session(port: &mut WireConnection, config: &PoolConfig) -> Result<i32> {
    match &config.user {
        Some(user) => {
            port.write_object(&Object::Request(Request::BeginSession2))
                .await?;
            port.write_object(&Object::string(&config.database)).await?;
            port.write_object(&Object::string(user)).await?;
            port.write_object(&Object::String(config.password.clone()))
                .await?;
        }
        None => {
            port.write_object(&Object::Request(Request::BeginSession))
                .await?;
            port.write_object(&Object::string(&config.database)).await?;
        }
    }
    port.flush().await?;

    let session_id = port.read_integer().await?;
    port.read_status().await?;
    Ok(session_id)
}

async fn end_session(port: &mut WireConnection, session_id: i32) -> Result<()> {
    port.write_object(&Object::Request(Request::EndSession))
        .await?;
    port.write_object(&Object::Integer(session_id)).await?;
    port.flush().await?;
    port.read_status().await
}
