//! Wire Protocol
//!
//! Requests arrive either as length-prefixed arrays or as inline text;
//! replies are always one of the simple status, error or bulk shapes.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` reply enum and its serialization
//! - `parser`: Request framing and command extraction
//!
//! ## Example
//!
//! ```
//! use pulsekv::protocol::{parse_frame, RespValue};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (command, consumed) = parse_frame(data).unwrap().unwrap();
//! assert_eq!(command.name, "GET");
//! assert_eq!(consumed, data.len());
//!
//! // Creating replies
//! let reply = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    parse_command, parse_frame, pending_frame, ParseError, ParseResult, ParsedCommand,
    PendingFrame,
};
pub use types::RespValue;
