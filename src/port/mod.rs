//! Wire connection layer.
//!
//! Architecture:
//! - `identity`: master/slave ids and the session identity
//! - `protocol`: object channel encoding/decoding
//! - `resolver`: host resolution with a last-good-address cache
//! - `connection`: socket ownership and the open handshake

pub mod connection;
pub mod identity;
pub mod protocol;
pub mod resolver;

pub use connection::WireConnection;
pub use identity::{
    is_normal, AuthorizeMode, ConnectionType, SessionIdentity, SLAVE_ID_ANY, SLAVE_ID_MAXIMUM,
    SLAVE_ID_MINIMUM, SLAVE_ID_UNDEFINED,
};
pub use protocol::{Object, Request, Status};
pub use resolver::{Endpoint, EndpointResolver};
