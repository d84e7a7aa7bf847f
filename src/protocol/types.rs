//! Reply Types
//!
//! The server answers every request with one of four reply shapes, all
//! terminated with CRLF (`\r\n`):
//!
//! - `+` Simple status, e.g. `+PONG\r\n`, `+OK\r\n`
//! - `-` Error, e.g. `-ERR unknown command 'FOO'\r\n`
//! - `$` Bulk string, e.g. `$5\r\nhello\r\n`
//! - `$-1` Null bulk string, `$-1\r\n`

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used by every request segment and reply
pub const CRLF: &[u8] = b"\r\n";

/// Type prefix bytes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply produced by the command dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line without binary payload.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error line. The message carries its own `ERR` prefix.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// Length-prefixed payload.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string, the "no such key" sentinel.
    /// Format: `$-1\r\n`
    Null,
}

impl RespValue {
    /// Creates a new simple string reply.
    ///
    /// # Example
    /// ```
    /// use pulsekv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// assert_eq!(ok.serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error reply.
    ///
    /// # Example
    /// ```
    /// use pulsekv::protocol::types::RespValue;
    /// let err = RespValue::error("ERR syntax error");
    /// assert_eq!(err.serialize(), b"-ERR syntax error\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates a new bulk string reply.
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Creates a null reply.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Common reply for successful writes
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Reply to PING
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the reply to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Serializes the reply onto the end of an existing buffer.
    ///
    /// Connections use this to queue replies in their write buffer without
    /// an intermediate allocation.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_u8(prefix::SIMPLE_STRING);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.put_u8(prefix::ERROR);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => {
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(b"-1");
                buf.put_slice(CRLF);
            }
        }
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::BulkString(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            RespValue::Null => write!(f, "(nil)"),
        }
    }
}
