//! XA error taxonomy and the translation from server failures.

use std::fmt;

use thiserror::Error;

use crate::error::Error;

// X/Open return codes
pub const XA_OK: i32 = 0;
pub const XA_RDONLY: i32 = 3;
pub const XA_HEURMIX: i32 = 5;
pub const XA_HEURRB: i32 = 6;
pub const XA_HEURCOM: i32 = 7;
pub const XAER_RMERR: i32 = -3;
pub const XAER_NOTA: i32 = -4;
pub const XAER_INVAL: i32 = -5;
pub const XAER_PROTO: i32 = -6;
pub const XAER_DUPID: i32 = -8;
pub const XAER_OUTSIDE: i32 = -9;

/// Why an XA verb failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XaErrorCode {
    DuplicateIdentifier,
    HeuristicCommit,
    HeuristicMixed,
    HeuristicRollback,
    InsideActiveBranch,
    InvalidIdentifier,
    ProtocolError,
    UnknownIdentifier,
    ResourceManagerError,
    InvalidArgument,
}

impl XaErrorCode {
    /// Map a server status code. Anything unrecognized is a resource-manager error.
    pub fn from_sql_state(sql_state: Option<&str>) -> Self {
        match sql_state {
            Some("XAE08") => XaErrorCode::DuplicateIdentifier,
            Some("XAH07") => XaErrorCode::HeuristicCommit,
            Some("XAH05") => XaErrorCode::HeuristicMixed,
            Some("XAH06") => XaErrorCode::HeuristicRollback,
            Some("XAE09") => XaErrorCode::InsideActiveBranch,
            Some("XAE05") => XaErrorCode::InvalidIdentifier,
            Some("XAE06") => XaErrorCode::ProtocolError,
            Some("XAE04") => XaErrorCode::UnknownIdentifier,
            _ => XaErrorCode::ResourceManagerError,
        }
    }

    /// X/Open numeric code reported to transaction managers.
    pub fn as_raw(self) -> i32 {
        match self {
            XaErrorCode::DuplicateIdentifier => XAER_DUPID,
            XaErrorCode::HeuristicCommit => XA_HEURCOM,
            XaErrorCode::HeuristicMixed => XA_HEURMIX,
            XaErrorCode::HeuristicRollback => XA_HEURRB,
            XaErrorCode::InsideActiveBranch => XAER_OUTSIDE,
            XaErrorCode::InvalidIdentifier => XAER_INVAL,
            XaErrorCode::ProtocolError => XAER_PROTO,
            XaErrorCode::UnknownIdentifier => XAER_NOTA,
            XaErrorCode::ResourceManagerError => XAER_RMERR,
            XaErrorCode::InvalidArgument => XAER_INVAL,
        }
    }

    pub fn is_heuristic(self) -> bool {
        matches!(
            self,
            XaErrorCode::HeuristicCommit
                | XaErrorCode::HeuristicMixed
                | XaErrorCode::HeuristicRollback
        )
    }
}

impl fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            XaErrorCode::DuplicateIdentifier => "XAER_DUPID",
            XaErrorCode::HeuristicCommit => "XA_HEURCOM",
            XaErrorCode::HeuristicMixed => "XA_HEURMIX",
            XaErrorCode::HeuristicRollback => "XA_HEURRB",
            XaErrorCode::InsideActiveBranch => "XAER_OUTSIDE",
            XaErrorCode::InvalidIdentifier | XaErrorCode::InvalidArgument => "XAER_INVAL",
            XaErrorCode::ProtocolError => "XAER_PROTO",
            XaErrorCode::UnknownIdentifier => "XAER_NOTA",
            XaErrorCode::ResourceManagerError => "XAER_RMERR",
        };
        f.write_str(name)
    }
}

/// A failed XA verb.
#[derive(Error, Debug)]
#[error("XA error {code}: {message}")]
pub struct XaError {
    code: XaErrorCode,
    message: String,
    sql_state: Option<String>,
}

impl XaError {
    pub fn new(code: XaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            sql_state: None,
        }
    }

    pub fn code(&self) -> XaErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Status code of the server failure behind this error, if any.
    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }
}

impl From<Error> for XaError {
    fn from(err: Error) -> Self {
        if let Error::Xa(xa) = err {
            return xa;
        }
        let code = match &err {
            Error::Unsupported(_) => XaErrorCode::ResourceManagerError,
            Error::InvalidArgument(_) => XaErrorCode::InvalidArgument,
            other => XaErrorCode::from_sql_state(other.sql_state()),
        };
        Self {
            code,
            sql_state: err.sql_state().map(str::to_string),
            message: err.to_string(),
        }
    }
}

/// Wrap any failure of a control statement as an XA error.
pub(crate) fn translate(err: Error) -> Error {
    Error::Xa(XaError::from(err))
}
