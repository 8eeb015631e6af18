//! Transaction branch identifiers and their text form.

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest global transaction id or branch qualifier, in bytes.
pub const MAX_COMPONENT_LEN: usize = 64;

/// Format id meaning "no format".
pub const NULL_FORMAT_ID: i32 = -1;

/// Format id used when none is given.
pub const DEFAULT_FORMAT_ID: i32 = 1;

type Component = SmallVec<[u8; MAX_COMPONENT_LEN]>;

/// Identifies one branch of a distributed transaction.
///
/// Two ids are equal when format id, global transaction id and branch
/// qualifier are all equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Component,
    branch_qualifier: Component,
}

impl Xid {
    pub fn new(format_id: i32, global_transaction_id: &[u8], branch_qualifier: &[u8]) -> Result<Self> {
        if format_id < NULL_FORMAT_ID {
            return Err(Error::InvalidArgument(format!(
                "format id must be at least -1, got {}",
                format_id
            )));
        }
        check_len("global transaction id", global_transaction_id)?;
        check_len("branch qualifier", branch_qualifier)?;

        Ok(Self {
            format_id,
            global_transaction_id: SmallVec::from_slice(global_transaction_id),
            branch_qualifier: SmallVec::from_slice(branch_qualifier),
        })
    }

    pub fn with_default_format(global_transaction_id: &[u8], branch_qualifier: &[u8]) -> Result<Self> {
        Self::new(DEFAULT_FORMAT_ID, global_transaction_id, branch_qualifier)
    }

    /// A fresh id with a random global transaction id and no branch qualifier.
    pub fn generate() -> Self {
        Self {
            format_id: DEFAULT_FORMAT_ID,
            global_transaction_id: SmallVec::from_slice(Uuid::new_v4().as_bytes()),
            branch_qualifier: SmallVec::new(),
        }
    }

    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }

    /// Text form used in control statements: `X'<gtrid>',X'<bqual>'[,<format>]`.
    pub fn to_branch_identifier(&self) -> String {
        self.to_string()
    }
}

fn check_len(what: &str, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_COMPONENT_LEN {
        return Err(Error::InvalidArgument(format!(
            "{} is {} bytes, at most {} allowed",
            what,
            bytes.len(),
            MAX_COMPONENT_LEN
        )));
    }
    Ok(())
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X'{}',X'{}'",
            hex::encode(&self.global_transaction_id),
            hex::encode(&self.branch_qualifier)
        )?;
        if self.format_id > NULL_FORMAT_ID {
            write!(f, ",{}", self.format_id)?;
        }
        Ok(())
    }
}

impl FromStr for Xid {
    type Err = Error;

    /// Parse the text form. A missing qualifier reads as empty and a missing
    /// format id as the default, so an id with format -1 does not survive a
    /// round trip.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, ',');
        let gtrid = parts
            .next()
            .ok_or_else(|| invalid(s))
            .and_then(|p| parse_hex_literal(p, s))?;
        let bqual = match parts.next() {
            Some(p) => parse_hex_literal(p, s)?,
            None => Vec::new(),
        };
        let format_id = match parts.next() {
            Some(p) => p.trim().parse().map_err(|_| invalid(s))?,
            None => DEFAULT_FORMAT_ID,
        };
        Self::new(format_id, &gtrid, &bqual)
    }
}

fn parse_hex_literal(part: &str, whole: &str) -> Result<Vec<u8>> {
    let part = part.trim();
    let body = part
        .strip_prefix("X'")
        .or_else(|| part.strip_prefix("x'"))
        .and_then(|p| p.strip_suffix('\''))
        .ok_or_else(|| invalid(whole))?;
    hex::decode(body).map_err(|_| invalid(whole))
}

fn invalid(s: &str) -> Error {
    Error::InvalidArgument(format!("not a branch identifier: {:?}", s))
}
