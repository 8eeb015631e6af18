//! Statement execution seam.
//!
//! Encoding SQL statements and decoding result rows belongs to a
//! [`StatementExecutor`] supplied by the application. The pool and the XA
//! coordinator only need the outcome of a statement and, for `XA RECOVER`,
//! its rows.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::port::WireConnection;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Bytes of a binary or text value; null reads as empty.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            Value::Null => Some(&[]),
            _ => None,
        }
    }

    /// Integer value, narrowing 64-bit integers that fit.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            Value::BigInt(i) => i32::try_from(*i).ok(),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names, empty for statements without a result set
    pub columns: Vec<String>,
    /// Row data
    pub rows: Vec<Vec<Value>>,
    /// Rows affected, when the statement reports it
    pub rows_affected: Option<u64>,
}

impl QueryResult {
    /// Result of a statement that returned nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Result with a row set.
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            rows_affected: None,
        }
    }
}

/// Executes SQL text over an established server session.
///
/// Implementations own the statement encoding. Errors should carry the
/// server's status code ([`Error::Server`](crate::Error::Server)) so the pool
/// can tell a dead session from a failed statement.
#[async_trait]
pub trait StatementExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        port: &mut WireConnection,
        session_id: i32,
        sql: &str,
    ) -> Result<QueryResult>;
}

pub type SharedExecutor = Arc<dyn StatementExecutor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Binary(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
        assert_eq!(Value::Null.as_bytes(), Some(&[][..]));
        assert_eq!(Value::Int(3).as_bytes(), None);

        assert_eq!(Value::Int(7).as_i32(), Some(7));
        assert_eq!(Value::BigInt(7).as_i32(), Some(7));
        assert_eq!(Value::BigInt(i64::MAX).as_i32(), None);
        assert_eq!(Value::Text(" -1 ".into()).as_i32(), Some(-1));
        assert!(Value::Null.is_null());
    }
}
