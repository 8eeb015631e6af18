//! XA resource: drives two-phase commit through control statements.
//!
//! Every verb becomes one statement of the form `XA <VERB> <branch id>`
//! executed on a single logical connection. Branch state lives on the
//! server; the resource itself only remembers the last recovery scan.

use std::any::Any;

use async_trait::async_trait;
use tracing::debug;

use super::error::{translate, XA_OK, XA_RDONLY};
use super::xid::Xid;
use crate::error::{Error, Result};
use crate::executor::{QueryResult, Value};
use crate::session::{IsolationLevel, LogicalConnection};

/// XA flag word passed by a transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XaFlags(pub i32);

impl XaFlags {
    pub const NO_FLAGS: XaFlags = XaFlags(0);
    pub const END_RSCAN: XaFlags = XaFlags(0x0080_0000);
    pub const START_RSCAN: XaFlags = XaFlags(0x0100_0000);
    pub const SUSPEND: XaFlags = XaFlags(0x0200_0000);
    pub const SUCCESS: XaFlags = XaFlags(0x0400_0000);
    pub const RESUME: XaFlags = XaFlags(0x0800_0000);
    pub const FAIL: XaFlags = XaFlags(0x2000_0000);
    pub const JOIN: XaFlags = XaFlags(0x0020_0000);
    pub const ONE_PHASE: XaFlags = XaFlags(0x4000_0000);
}

/// Outcome of `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Ok,
    ReadOnly,
}

impl Vote {
    pub fn as_raw(self) -> i32 {
        match self {
            Vote::Ok => XA_OK,
            Vote::ReadOnly => XA_RDONLY,
        }
    }
}

/// What the resource needs from the connection it drives.
#[async_trait]
pub trait ControlConnection: Send + Sync {
    async fn execute_control(&self, sql: &str) -> Result<QueryResult>;

    async fn is_read_only(&self) -> Result<bool>;

    async fn transaction_isolation(&self) -> Result<IsolationLevel>;
}

#[async_trait]
impl ControlConnection for LogicalConnection {
    async fn execute_control(&self, sql: &str) -> Result<QueryResult> {
        let statement = self.create_statement()?;
        statement.execute(sql).await
    }

    async fn is_read_only(&self) -> Result<bool> {
        LogicalConnection::is_read_only(self).await
    }

    async fn transaction_isolation(&self) -> Result<IsolationLevel> {
        LogicalConnection::transaction_isolation(self).await
    }
}

/// XA resource over one connection.
pub struct XaResource<C = LogicalConnection> {
    conn: C,
    /// Result of the previous recovery scan
    recover_xids: Option<Vec<Xid>>,
}

impl<C: ControlConnection> XaResource<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            recover_xids: None,
        }
    }

    /// The connection statements run on.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Associate the connection with a new branch.
    ///
    /// Only `NO_FLAGS` is accepted; joining or resuming a branch is not
    /// supported by the server.
    pub async fn start(&self, xid: &Xid, flags: XaFlags) -> Result<()> {
        match flags {
            XaFlags::NO_FLAGS => {}
            XaFlags::JOIN => return Err(Error::Unsupported("TMJOIN")),
            XaFlags::RESUME => return Err(Error::Unsupported("TMRESUME")),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "invalid flags for start: {:#x}",
                    other.0
                )))
            }
        }

        let read_only = self.conn.is_read_only().await.map_err(translate)?;
        let isolation = self.conn.transaction_isolation().await.map_err(translate)?;

        let mut sql = format!("XA START {}", xid);
        sql.push_str(if read_only { " READ ONLY" } else { " READ WRITE" });
        match isolation {
            IsolationLevel::None => {}
            IsolationLevel::UsingSnapshot => sql.push_str(",USING SNAPSHOT"),
            level => {
                sql.push_str(",ISOLATION LEVEL ");
                sql.push_str(&level.to_string());
            }
        }
        self.run(&sql).await.map(drop)
    }

    /// Dissociate the connection from the branch.
    pub async fn end(&self, xid: &Xid, flags: XaFlags) -> Result<()> {
        match flags {
            XaFlags::SUCCESS | XaFlags::FAIL => {}
            XaFlags::SUSPEND => return Err(Error::Unsupported("TMSUSPEND")),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "invalid flags for end: {:#x}",
                    other.0
                )))
            }
        }
        self.run(&format!("XA END {}", xid)).await.map(drop)
    }

    pub async fn prepare(&self, xid: &Xid) -> Result<Vote> {
        self.run(&format!("XA PREPARE {}", xid)).await?;
        if self.conn.is_read_only().await.map_err(translate)? {
            Ok(Vote::ReadOnly)
        } else {
            Ok(Vote::Ok)
        }
    }

    pub async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()> {
        let mut sql = format!("XA COMMIT {}", xid);
        if one_phase {
            sql.push_str(" ONE PHASE");
        }
        self.run(&sql).await.map(drop)
    }

    pub async fn rollback(&self, xid: &Xid) -> Result<()> {
        self.run(&format!("XA ROLLBACK {}", xid)).await.map(drop)
    }

    /// Discard a heuristically completed branch.
    pub async fn forget(&self, xid: &Xid) -> Result<()> {
        self.run(&format!("XA FORGET {}", xid)).await.map(drop)
    }

    /// List prepared or heuristically completed branches.
    ///
    /// Outside a scan start, a result identical to the previous scan is
    /// reported as empty so a transaction manager looping on `recover` sees
    /// each branch once.
    pub async fn recover(&mut self, flags: XaFlags) -> Result<Vec<Xid>> {
        if !matches!(
            flags,
            XaFlags::START_RSCAN | XaFlags::END_RSCAN | XaFlags::NO_FLAGS
        ) {
            return Err(Error::InvalidArgument(format!(
                "invalid flags for recover: {:#x}",
                flags.0
            )));
        }

        let result = self.run("XA RECOVER").await?;
        let found = result
            .rows
            .iter()
            .map(|row| xid_from_row(row))
            .collect::<Result<Vec<_>>>()
            .map_err(translate)?;

        Ok(self.merge_scan(flags, found))
    }

    fn merge_scan(&mut self, flags: XaFlags, found: Vec<Xid>) -> Vec<Xid> {
        if flags != XaFlags::START_RSCAN {
            if let Some(previous) = &self.recover_xids {
                if !previous.is_empty() && *previous == found {
                    return Vec::new();
                }
            }
        }
        self.recover_xids = Some(found.clone());
        found
    }

    /// Always 0; the server has no per-branch timeout.
    pub fn transaction_timeout(&self) -> u32 {
        0
    }

    /// Always false; the timeout cannot be changed.
    pub fn set_transaction_timeout(&self, _seconds: u32) -> bool {
        false
    }

    async fn run(&self, sql: &str) -> Result<QueryResult> {
        debug!(statement = sql, "xa control statement");
        self.conn.execute_control(sql).await.map_err(translate)
    }
}

impl<C: ControlConnection + 'static> XaResource<C> {
    /// True when `other` is an XA resource of the same kind. The server
    /// endpoint is not compared.
    pub fn is_same_rm(&self, other: &dyn Any) -> bool {
        other.is::<Self>()
    }
}

fn xid_from_row(row: &[Value]) -> Result<Xid> {
    let bad_row = || Error::Protocol(format!("malformed XA RECOVER row: {:?}", row));
    let gtrid = row.first().and_then(Value::as_bytes).ok_or_else(bad_row)?;
    let bqual = row.get(1).and_then(Value::as_bytes).ok_or_else(bad_row)?;
    let format_id = row.get(2).and_then(Value::as_i32).ok_or_else(bad_row)?;
    Xid::new(format_id, gtrid, bqual)
}
