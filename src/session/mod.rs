//! Server sessions and the handles issued on them.
//!
//! Architecture:
//! - `physical`: one server session over one wire connection
//! - `pooled`: a physical session that issues logical handles and reports events
//! - `handle`: `LogicalConnection` and `Statement`
//! - `events`: lifecycle notifications consumed by pools

pub mod events;
pub mod handle;
pub mod physical;
pub mod pooled;


pub use events::{ConnectionEvent, ConnectionEventKind, ConnectionEventListener};
pub use handle::{LogicalConnection, Statement};
pub use physical::{IsolationLevel, Session};
pub use pooled::PooledSession;
