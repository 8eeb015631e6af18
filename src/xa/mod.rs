//! Distributed transactions.
//!
//! [`XaResource`] lets an external transaction manager run two-phase commit
//! over a [`LogicalConnection`](crate::session::LogicalConnection), with
//! branches named by [`Xid`].

pub mod error;
pub mod resource;
pub mod xid;

pub use error::{XaError, XaErrorCode};
pub use resource::{ControlConnection, Vote, XaFlags, XaResource};
pub use xid::Xid;
