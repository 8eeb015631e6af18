//! doqlink - pooled sessions and XA two-phase commit for DoqueDB.
//!
//! A [`ConnectionPool`] keeps a bounded set of server sessions open and lends
//! them out as [`LogicalConnection`]s. An [`XaResource`] wraps one of those
//! handles so a transaction manager can drive two-phase commit.
//!
//! Statement encoding is left to a [`StatementExecutor`] supplied by the
//! application.
//!
//! ```no_run
//! # async fn demo(executor: doqlink::SharedExecutor) -> doqlink::Result<()> {
//! use doqlink::{ConnectionPool, PoolConfig, Xid, XaFlags, XaResource};
//!
//! let config = PoolConfig::from_url("doquedb://localhost:54321/DefaultDB?maxConnections=4")?;
//! let pool = ConnectionPool::connect(config, executor).await?;
//!
//! let xa = XaResource::new(pool.acquire().await?);
//! let xid = Xid::generate();
//! xa.start(&xid, XaFlags::NO_FLAGS).await?;
//! xa.connection().execute("INSERT INTO t VALUES (1)").await?;
//! xa.end(&xid, XaFlags::SUCCESS).await?;
//! xa.prepare(&xid).await?;
//! xa.commit(&xid, false).await?;
//!
//! xa.into_inner().close().await?;
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod pool;
pub mod port;
pub mod registry;
pub mod session;
pub mod xa;

#[cfg(test)]
mod testing;

pub use config::PoolConfig;
pub use error::{is_fatal_state, Error, Result};
pub use executor::{QueryResult, SharedExecutor, StatementExecutor, Value};
pub use pool::ConnectionPool;
pub use port::{Endpoint, EndpointResolver, SessionIdentity};
pub use registry::PoolRegistry;
pub use session::{IsolationLevel, LogicalConnection, Statement};
pub use xa::{Vote, XaError, XaErrorCode, XaFlags, XaResource, Xid};
