//! Object channel encoding and decoding.
//!
//! After the handshake, client and server exchange tagged objects: a class id
//! (big-endian i32) followed by a class-specific payload. Strings and binaries
//! are length-prefixed; a string length of -1 encodes a null string.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

// ============================================================================
// Protocol Constants
// ============================================================================

/// Class ids of the objects understood by this layer.
pub mod class_id {
    pub const NULL: i32 = 0;
    pub const STATUS: i32 = 1;
    pub const REQUEST: i32 = 2;
    pub const INTEGER: i32 = 3;
    pub const STRING: i32 = 4;
    pub const BINARY: i32 = 5;
    pub const ERROR_INFO: i32 = 6;
}

/// Largest string or binary payload accepted from the server.
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Outcome marker the server sends at the end of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    Error = 1,
    Canceled = 2,
}

impl TryFrom<i32> for Status {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Status::Success),
            1 => Ok(Status::Error),
            2 => Ok(Status::Canceled),
            other => Err(Error::Protocol(format!("Unknown status: {}", other))),
        }
    }
}

/// Requests a client can issue on an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Request {
    BeginSession = 3,
    EndSession = 4,
    BeginSession2 = 26,
}

impl TryFrom<i32> for Request {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            3 => Ok(Request::BeginSession),
            4 => Ok(Request::EndSession),
            26 => Ok(Request::BeginSession2),
            other => Err(Error::Protocol(format!("Unknown request: {}", other))),
        }
    }
}

// ============================================================================
// Objects
// ============================================================================

/// One object on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Null,
    Status(Status),
    Request(Request),
    Integer(i32),
    String(Option<String>),
    Binary(Vec<u8>),
    ErrorInfo {
        number: i32,
        sql_state: Option<String>,
        message: Option<String>,
    },
}

impl Object {
    /// Shorthand for a non-null string object.
    pub fn string(s: &str) -> Self {
        Object::String(Some(s.to_string()))
    }

    /// Encode the object including its class id.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Object::Null => buf.put_i32(class_id::NULL),
            Object::Status(status) => {
                buf.put_i32(class_id::STATUS);
                buf.put_i32(*status as i32);
            }
            Object::Request(request) => {
                buf.put_i32(class_id::REQUEST);
                buf.put_i32(*request as i32);
            }
            Object::Integer(value) => {
                buf.put_i32(class_id::INTEGER);
                buf.put_i32(*value);
            }
            Object::String(value) => {
                buf.put_i32(class_id::STRING);
                put_string(buf, value.as_deref());
            }
            Object::Binary(data) => {
                buf.put_i32(class_id::BINARY);
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
            }
            Object::ErrorInfo {
                number,
                sql_state,
                message,
            } => {
                buf.put_i32(class_id::ERROR_INFO);
                buf.put_i32(*number);
                put_string(buf, sql_state.as_deref());
                put_string(buf, message.as_deref());
            }
        }
    }

    /// Read one object from a stream.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let class = reader.read_i32().await?;
        match class {
            class_id::NULL => Ok(Object::Null),
            class_id::STATUS => Ok(Object::Status(Status::try_from(reader.read_i32().await?)?)),
            class_id::REQUEST => Ok(Object::Request(Request::try_from(
                reader.read_i32().await?,
            )?)),
            class_id::INTEGER => Ok(Object::Integer(reader.read_i32().await?)),
            class_id::STRING => Ok(Object::String(read_string(reader).await?)),
            class_id::BINARY => {
                let len = read_len(reader).await?;
                let mut data = vec![0u8; len];
                reader.read_exact(&mut data).await?;
                Ok(Object::Binary(data))
            }
            class_id::ERROR_INFO => {
                let number = reader.read_i32().await?;
                let sql_state = read_string(reader).await?;
                let message = read_string(reader).await?;
                Ok(Object::ErrorInfo {
                    number,
                    sql_state,
                    message,
                })
            }
            other => Err(Error::Protocol(format!("Unknown class id: {}", other))),
        }
    }

    /// Turn an error-info object into the error it describes.
    pub fn into_error(self) -> Error {
        match self {
            Object::ErrorInfo {
                number,
                sql_state,
                message,
            } => Error::Server {
                sql_state,
                message: message.unwrap_or_else(|| format!("server error {}", number)),
            },
            other => Error::Protocol(format!("Expected error info, got {:?}", other)),
        }
    }
}

fn put_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(s) => {
            buf.put_i32(s.len() as i32);
            buf.put_slice(s.as_bytes());
        }
        None => buf.put_i32(-1),
    }
}

async fn read_len<R: AsyncRead + Unpin>(reader: &mut R) -> Result<usize> {
    let len = reader.read_i32().await?;
    if len < 0 || len as usize > MAX_PAYLOAD {
        return Err(Error::Protocol(format!("Invalid payload length: {}", len)));
    }
    Ok(len as usize)
}

async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let len = reader.read_i32().await?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 || len as usize > MAX_PAYLOAD {
        return Err(Error::Protocol(format!("Invalid string length: {}", len)));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    String::from_utf8(data)
        .map(Some)
        .map_err(|_| Error::Protocol("String is not valid UTF-8".to_string()))
}
