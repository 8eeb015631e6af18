//! Error types for doqlink.
//!
//! Every public operation fails with exactly one [`Error`]. Errors that carry a
//! status code take part in fatal classification: a fatal error means the
//! physical session behind a handle is no longer usable and must be evicted.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::xa::{XaError, XaErrorCode};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("No pooled session became available within {0:?}")]
    LockTimeout(Duration),

    #[error("Connection handle is closed")]
    StaleHandle,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not supported: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Xa(#[from] XaError),

    #[error("Unexpected: {0}")]
    Unexpected(String),

    /// Failure reported by the server, with its status code when one was sent.
    #[error("Server error: {message} (status {})", .sql_state.as_deref().unwrap_or("none"))]
    Server {
        sql_state: Option<String>,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Status-code classes that mean the session is dead.
const FATAL_CLASSES: &[&str] = &[
    "08",    // connection exception
    "53",    // insufficient resources
    "57P01", // admin shutdown
    "57P02", // crash shutdown
    "57P03", // cannot connect now
    "58",    // system error (backend)
    "60",    // system error (driver)
    "99",    // unexpected error
    "F0",    // configuration file error
    "XX",    // internal error
];

/// Returns true if an error with this status code leaves the session unusable.
///
/// A missing code, or one too short to name a class, is treated as fatal.
pub fn is_fatal_state(sql_state: Option<&str>) -> bool {
    match sql_state {
        None => true,
        Some(state) if state.len() < 2 => true,
        Some(state) => FATAL_CLASSES.iter().any(|class| state.starts_with(class)),
    }
}

impl Error {
    /// Status code of this error, as used for fatal classification.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Error::ConnectFailed { .. } => Some("08001"),
            Error::HandshakeFailed(_) => Some("08004"),
            Error::Protocol(_) => Some("08P01"),
            Error::StaleHandle => Some("08003"),
            Error::LockTimeout(_) => Some("HYT00"),
            Error::InvalidArgument(_) => Some("22023"),
            Error::Unsupported(_) => Some("0A000"),
            Error::Config(_) => Some("HY000"),
            Error::Unexpected(_) => Some("99000"),
            Error::Server { sql_state, .. } => sql_state.as_deref(),
            Error::Xa(e) => e.sql_state(),
            Error::Io(_) => None,
        }
    }

    /// Whether the physical session that produced this error must be discarded.
    pub fn is_fatal(&self) -> bool {
        is_fatal_state(self.sql_state())
    }

    /// XA error code a transaction manager would see for this error.
    pub fn xa_code(&self) -> Option<XaErrorCode> {
        match self {
            Error::Xa(e) => Some(e.code()),
            Error::Unsupported(_) => Some(XaErrorCode::ResourceManagerError),
            Error::InvalidArgument(_) => Some(XaErrorCode::InvalidArgument),
            _ => None,
        }
    }

    pub(crate) fn server(sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Server {
            sql_state: Some(sql_state.into()),
            message: message.into(),
        }
    }
}
