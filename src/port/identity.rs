//! Session identity exchanged during the handshake.
//!
//! The master id packs the protocol version and authorization mode into its
//! high bits and the server's master number into its low 16 bits. The slave id
//! names one physical session on the server.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Slave ids
// ============================================================================

/// Smallest valid slave id.
pub const SLAVE_ID_MINIMUM: i32 = 0;

/// Upper bound (exclusive) of valid slave ids.
pub const SLAVE_ID_MAXIMUM: i32 = 0x7fff_ffff;

/// Slave id that has not been assigned yet (`0xffffffff`).
pub const SLAVE_ID_UNDEFINED: i32 = -1;

/// Slave id requesting any free id from the server (`0x80000000`).
pub const SLAVE_ID_ANY: i32 = i32::MIN;

/// Returns true if `slave_id` names a real session.
#[inline]
pub fn is_normal(slave_id: i32) -> bool {
    (SLAVE_ID_MINIMUM..SLAVE_ID_MAXIMUM).contains(&slave_id)
}

// ============================================================================
// Master ids
// ============================================================================

/// Protocol version this client speaks.
pub const CURRENT_PROTOCOL_VERSION: u32 = 5;

const MASTER_NUMBER_MASK: u32 = 0x0000_ffff;
const PROTOCOL_VERSION_MASK: u32 = 0x00ff_0000;
const PROTOCOL_VERSION_SHIFT: u32 = 16;
const AUTHORIZE_MODE_MASK: u32 = 0x0f00_0000;

/// Authorization mode carried in the master id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum AuthorizeMode {
    None = 0,
    Password = 0x0100_0000,
}

impl AuthorizeMode {
    fn from_bits(bits: u32) -> Self {
        match bits & AUTHORIZE_MODE_MASK {
            0x0100_0000 => AuthorizeMode::Password,
            _ => AuthorizeMode::None,
        }
    }
}

/// Master id a client sends to open a port.
///
/// A client that asks for no authorization is upgraded to password mode,
/// which every server of this protocol generation accepts.
pub fn client_master_id(protocol_version: u32, authorization: AuthorizeMode) -> u32 {
    let authorization = match authorization {
        AuthorizeMode::None => AuthorizeMode::Password,
        mode => mode,
    };
    ((protocol_version << PROTOCOL_VERSION_SHIFT) & PROTOCOL_VERSION_MASK) | authorization as u32
}

// ============================================================================
// Session Identity
// ============================================================================

/// Where the server runs relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Local,
    Remote,
}

impl ConnectionType {
    pub fn for_peer(addr: IpAddr) -> Self {
        if addr.is_loopback() {
            ConnectionType::Local
        } else {
            ConnectionType::Remote
        }
    }
}

/// Identity of one physical session, fixed once the handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub connection_type: ConnectionType,
    pub master_id: u32,
    pub slave_id: i32,
}

impl SessionIdentity {
    /// Protocol version negotiated by the server.
    pub fn protocol_version(&self) -> u32 {
        (self.master_id & PROTOCOL_VERSION_MASK) >> PROTOCOL_VERSION_SHIFT
    }

    /// Authorization mode the server expects.
    pub fn authorization(&self) -> AuthorizeMode {
        AuthorizeMode::from_bits(self.master_id)
    }

    /// Server-assigned master number.
    pub fn master_number(&self) -> u16 {
        (self.master_id & MASTER_NUMBER_MASK) as u16
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} session {}/{}",
            self.connection_type,
            self.master_number(),
            self.slave_id
        )
    }
}
