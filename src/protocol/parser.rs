//! Request Parser
//!
//! Turns raw request bytes into a [`ParsedCommand`]: an upper-cased command
//! name plus its ordered arguments. Two request encodings are accepted:
//!
//! 1. **Array**: `*<argc>\r\n` followed by `argc` elements shaped
//!    `$<len>\r\n<bytes>\r\n`. Lines that do not start with `$` are skipped.
//! 2. **Inline**: anything else, split on ASCII whitespace.
//!
//! ## Framing
//!
//! TCP delivers a byte stream, not messages, so the connection layer calls
//! [`parse_frame`] on its accumulated buffer:
//!
//! - `Ok(Some((command, consumed)))` - one complete request in the first
//!   `consumed` bytes
//! - `Ok(None)` - the request is incomplete, read more bytes
//! - `Err(ParseError)` - the bytes can never form a valid request
//!
//! [`parse_command`] is the non-incremental variant: it treats its input as
//! one whole request and never asks for more data.
//!
//! Both functions are pure.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while parsing a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A `*` or `$` header did not carry a decimal integer
    #[error("invalid integer: '{0}'")]
    InvalidInteger(String),

    /// Bulk length is negative
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Argument count is negative (other than the `*-1` null array) or too large
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// Framing violation (missing CRLF, etc.)
    #[error("{0}")]
    ProtocolError(String),

    /// A single element exceeds the allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk element (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in an array request
pub const MAX_ARGC: usize = 1024 * 1024;

/// A request split into its command name and arguments.
///
/// An empty `name` means the request carried no tokens at all; such a
/// command is silently ignored by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Command name, upper-cased
    pub name: String,
    /// Arguments in request order, byte-exact
    pub args: Vec<Bytes>,
}

impl ParsedCommand {
    /// Builds a command from its raw parts; the first part becomes the name.
    pub fn from_parts(parts: Vec<Bytes>) -> Self {
        let mut parts = parts.into_iter();
        match parts.next() {
            Some(first) => Self {
                name: String::from_utf8_lossy(&first).to_uppercase(),
                args: parts.collect(),
            },
            None => Self::default(),
        }
    }

    /// Returns true when the request contained no command name.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

/// Whether the parser may ask the caller for more bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// Running out of bytes means "incomplete"
    Streaming,
    /// Running out of bytes ends the request
    Complete,
}

/// Attempts to take one complete request off the front of `buf`.
///
/// Array requests are complete once `argc` bulk elements are present.
/// Inline requests are complete at the first `\n`; a trailing `\r` is
/// dropped with the rest of the whitespace.
///
/// # Example
///
/// ```
/// use pulsekv::protocol::parse_frame;
///
/// let buf = b"*1\r\n$4\r\nPING\r\nECHO hi\r\n";
/// let (first, consumed) = parse_frame(buf).unwrap().unwrap();
/// assert_eq!(first.name, "PING");
///
/// let (second, _) = parse_frame(&buf[consumed..]).unwrap().unwrap();
/// assert_eq!(second.name, "ECHO");
/// ```
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(ParsedCommand, usize)>> {
    match buf.first() {
        None => Ok(None),
        Some(&prefix::ARRAY) => parse_array(buf, Framing::Streaming),
        Some(_) => Ok(buf
            .iter()
            .position(|&b| b == b'\n')
            .map(|pos| (tokenize(&buf[..pos]), pos + 1))),
    }
}

/// Parses `buf` as one whole request.
///
/// A truncated array request yields the elements that were fully present.
/// An empty or whitespace-only buffer yields an empty command.
///
/// # Example
///
/// ```
/// use pulsekv::protocol::parse_command;
///
/// let array = parse_command(b"*3\r\n$3\r\nset\r\n$3\r\nkey\r\n$5\r\nvalue\r\n").unwrap();
/// let inline = parse_command(b"SET key value").unwrap();
/// assert_eq!(array, inline);
/// ```
pub fn parse_command(buf: &[u8]) -> ParseResult<ParsedCommand> {
    match buf.first() {
        Some(&prefix::ARRAY) => Ok(parse_array(buf, Framing::Complete)?
            .map(|(command, _)| command)
            .unwrap_or_default()),
        _ => Ok(tokenize(buf)),
    }
}

/// Parses an array request: `*<count>\r\n` then `count` bulk elements.
fn parse_array(buf: &[u8], framing: Framing) -> ParseResult<Option<(ParsedCommand, usize)>> {
    debug_assert!(buf[0] == prefix::ARRAY);

    let (count_line, mut consumed) = match read_line(buf, 1) {
        Some(line) => line,
        None if framing == Framing::Complete => (&buf[1..], buf.len()),
        None => return Ok(None),
    };

    let count = parse_integer(count_line)?;

    // Null array carries no command
    if count == -1 {
        return Ok(Some((ParsedCommand::default(), consumed)));
    }
    if count < 0 || count as u64 > MAX_ARGC as u64 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    let count = count as usize;
    let mut elements = Vec::with_capacity(count.min(16));

    while elements.len() < count {
        let (line, data_start) = match read_line(buf, consumed) {
            Some(line) => line,
            None => return Ok(truncated(elements, buf.len(), framing)),
        };

        if line.first() != Some(&prefix::BULK_STRING) {
            consumed = data_start;
            continue;
        }

        let length = parse_integer(&line[1..])?;
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }
        if length as u64 > MAX_BULK_SIZE as u64 {
            return Err(ParseError::MessageTooLarge {
                size: length as usize,
                max: MAX_BULK_SIZE,
            });
        }

        let data_end = data_start + length as usize;

        if buf.len() < data_end + CRLF.len() {
            // Whole request: accept a payload whose terminator was cut off
            if framing == Framing::Complete
                && buf.len() >= data_end
                && CRLF.starts_with(&buf[data_end..])
            {
                elements.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
            }
            return Ok(truncated(elements, buf.len(), framing));
        }

        if &buf[data_end..data_end + CRLF.len()] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        elements.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        consumed = data_end + CRLF.len();
    }

    Ok(Some((ParsedCommand::from_parts(elements), consumed)))
}

/// Result for an array request that ran out of bytes.
fn truncated(
    elements: Vec<Bytes>,
    len: usize,
    framing: Framing,
) -> Option<(ParsedCommand, usize)> {
    match framing {
        Framing::Streaming => None,
        Framing::Complete => Some((ParsedCommand::from_parts(elements), len)),
    }
}

/// Size accounting for the incomplete request at the front of a buffer.
///
/// Bytes promised by parsed headers are `declared`; everything else is
/// `unframed`. A connection bounds the two separately, so a large bulk
/// payload may be buffered while a runaway inline line may not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingFrame {
    /// Header lines plus the payload and CRLF of every parsed `$<len>`
    /// header, including bytes that have not arrived yet
    pub declared: usize,
    /// Bytes no header accounts for: an unterminated inline line, a partial
    /// header line, or skipped non-bulk lines
    pub unframed: usize,
}

/// Measures an incomplete request at the front of `buf`.
///
/// Meant for buffers on which [`parse_frame`] returned `Ok(None)`; it never
/// fails and stops at the first header it cannot read.
///
/// # Example
///
/// ```
/// use pulsekv::protocol::parser::pending_frame;
///
/// let pending = pending_frame(b"*2\r\n$3\r\nSET\r\n$100000\r\nabc");
/// assert_eq!(pending.unframed, 0);
/// assert!(pending.declared > 100_000);
///
/// assert_eq!(pending_frame(b"GET some").unframed, 8);
/// ```
pub fn pending_frame(buf: &[u8]) -> PendingFrame {
    let mut pending = PendingFrame::default();

    if buf.first() != Some(&prefix::ARRAY) {
        pending.unframed = buf.len();
        return pending;
    }

    let Some((count_line, mut offset)) = read_line(buf, 1) else {
        pending.unframed = buf.len();
        return pending;
    };
    pending.declared = offset;

    let count = match parse_integer(count_line) {
        Ok(count) if count > 0 => count as usize,
        _ => return pending,
    };

    let mut seen = 0;
    while seen < count {
        let Some((line, data_start)) = read_line(buf, offset) else {
            pending.unframed += buf.len() - offset;
            break;
        };

        if line.first() != Some(&prefix::BULK_STRING) {
            pending.unframed += data_start - offset;
            offset = data_start;
            continue;
        }

        let Some(length) = parse_integer(&line[1..])
            .ok()
            .and_then(|length| usize::try_from(length).ok())
        else {
            break;
        };

        let element_end = data_start
            .saturating_add(length)
            .saturating_add(CRLF.len());
        pending.declared = pending.declared.saturating_add(element_end - offset);

        if element_end >= buf.len() {
            break;
        }
        offset = element_end;
        seen += 1;
    }

    pending
}

/// Splits an inline request into whitespace-delimited tokens.
fn tokenize(line: &[u8]) -> ParsedCommand {
    ParsedCommand::from_parts(
        line.split(u8::is_ascii_whitespace)
            .filter(|token| !token.is_empty())
            .map(Bytes::copy_from_slice)
            .collect(),
    )
}

/// Reads the CRLF-terminated line starting at `start`.
///
/// Returns the line without its terminator and the offset just past it.
#[inline]
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    find_crlf(rest).map(|pos| (&rest[..pos], start + pos + CRLF.len()))
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == CRLF)
}

fn parse_integer(line: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str, args: &[&str]) -> ParsedCommand {
        ParsedCommand {
            name: name.to_string(),
            args: args.iter().map(|a| Bytes::from(a.to_string())).collect(),
        }
    }

    #[test]
    fn test_parse_array_command() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
        let (parsed, consumed) = parse_frame(input).unwrap().unwrap();
        assert_eq!(parsed, command("GET", &["name"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_inline_command() {
        let (parsed, consumed) = parse_frame(b"echo   hello\r\n").unwrap().unwrap();
        assert_eq!(parsed, command("ECHO", &["hello"]));
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_inline_bare_newline() {
        let (parsed, consumed) = parse_frame(b"PING\nGET").unwrap().unwrap();
        assert_eq!(parsed, command("PING", &[]));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_array_and_inline_agree() {
        let array = parse_command(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n").unwrap();
        let inline = parse_command(b"SET key value\r\n").unwrap();
        assert_eq!(array, inline);
        assert_eq!(array, command("SET", &["key", "value"]));
    }

    #[test]
    fn test_name_is_uppercased_args_are_not() {
        let parsed = parse_command(b"sEt Key VaLuE").unwrap();
        assert_eq!(parsed, command("SET", &["Key", "VaLuE"]));
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert_eq!(parse_command(b"").unwrap(), ParsedCommand::default());
        assert!(parse_command(b"  \t\r\n ").unwrap().is_empty());

        let (parsed, consumed) = parse_frame(b"\r\n").unwrap().unwrap();
        assert!(parsed.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_incomplete_frames() {
        assert!(parse_frame(b"").unwrap().is_none());
        assert!(parse_frame(b"*2").unwrap().is_none());
        assert!(parse_frame(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
        assert!(parse_frame(b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap().is_none());
        assert!(parse_frame(b"*2\r\n$3\r\nGET\r\n$4\r\nname").unwrap().is_none());
        assert!(parse_frame(b"GET name").unwrap().is_none());
    }

    #[test]
    fn test_fragmented_array_completes() {
        let full = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n";
        for split in 1..full.len() {
            assert!(parse_frame(&full[..split]).unwrap().is_none(), "split at {}", split);
        }
        let (parsed, consumed) = parse_frame(full).unwrap().unwrap();
        assert_eq!(parsed, command("SET", &["k", "v"]));
        assert_eq!(consumed, full.len());
    }

    #[test]
    fn test_pipelined_frames() {
        let input = b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
        let (first, consumed) = parse_frame(input).unwrap().unwrap();
        assert_eq!(first, command("PING", &[]));
        assert_eq!(consumed, 14);

        let (second, rest) = parse_frame(&input[consumed..]).unwrap().unwrap();
        assert_eq!(second, command("ECHO", &["hi"]));
        assert_eq!(consumed + rest, input.len());
    }

    #[test]
    fn test_non_bulk_lines_are_skipped() {
        let input = b"*2\r\n:junk\r\n$4\r\nECHO\r\n+more\r\n$2\r\nhi\r\n";
        let (parsed, consumed) = parse_frame(input).unwrap().unwrap();
        assert_eq!(parsed, command("ECHO", &["hi"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_bulk_payload_is_length_delimited() {
        // Payload contains CRLF and a space, and is taken verbatim
        let input = b"*2\r\n$4\r\nECHO\r\n$6\r\na b\r\nc\r\n";
        let (parsed, _) = parse_frame(input).unwrap().unwrap();
        assert_eq!(parsed.args, vec![Bytes::from_static(b"a b\r\nc")]);
    }

    #[test]
    fn test_null_and_empty_arrays() {
        let (parsed, consumed) = parse_frame(b"*-1\r\n").unwrap().unwrap();
        assert!(parsed.is_empty());
        assert_eq!(consumed, 5);

        let (parsed, _) = parse_frame(b"*0\r\n").unwrap().unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_invalid_headers() {
        assert_eq!(
            parse_frame(b"*abc\r\n"),
            Err(ParseError::InvalidInteger("abc".to_string()))
        );
        assert_eq!(
            parse_frame(b"*1\r\n$x\r\n"),
            Err(ParseError::InvalidInteger("x".to_string()))
        );
        assert_eq!(
            parse_frame(b"*-2\r\n"),
            Err(ParseError::InvalidArrayLength(-2))
        );
        assert_eq!(
            parse_frame(b"*1\r\n$-1\r\n"),
            Err(ParseError::InvalidBulkLength(-1))
        );
    }

    #[test]
    fn test_missing_trailing_crlf() {
        let result = parse_frame(b"*1\r\n$4\r\nPINGxx");
        assert!(matches!(result, Err(ParseError::ProtocolError(_))));
    }

    #[test]
    fn test_parse_command_truncated_array() {
        // Only the elements that were fully present survive
        let parsed = parse_command(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nva").unwrap();
        assert_eq!(parsed, command("SET", &["key"]));

        // A cut-off terminator is tolerated on a whole request
        let parsed = parse_command(b"*1\r\n$4\r\nPING").unwrap();
        assert_eq!(parsed, command("PING", &[]));

        assert!(parse_command(b"*1").unwrap().is_empty());
    }

    #[test]
    fn test_binary_safe_arguments() {
        let input = b"*2\r\n$4\r\nECHO\r\n$3\r\n\x00\xff\x01\r\n";
        let (parsed, _) = parse_frame(input).unwrap().unwrap();
        assert_eq!(parsed.args, vec![Bytes::from_static(b"\x00\xff\x01")]);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let input = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        assert_eq!(parse_frame(input), parse_frame(input));
        assert_eq!(parse_command(b"PING a b"), parse_command(b"PING a b"));
    }

    #[test]
    fn test_pending_frame_counts_declared_payload() {
        let pending = pending_frame(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$102400\r\nxyz");
        assert_eq!(pending.unframed, 0);
        // "*3\r\n" + "$3\r\nSET\r\n" + "$1\r\nk\r\n" + "$102400\r\n" + payload + CRLF
        assert_eq!(pending.declared, 4 + 9 + 7 + 9 + 102_400 + 2);
    }

    #[test]
    fn test_pending_frame_counts_unframed_bytes() {
        assert_eq!(pending_frame(b"SET key val").unframed, 11);
        assert_eq!(pending_frame(b"*2").unframed, 2);

        // Partial header after a complete element
        let pending = pending_frame(b"*2\r\n$4\r\nECHO\r\n$12");
        assert_eq!(pending.unframed, 3);
        assert_eq!(pending.declared, 4 + 10);

        // Skipped lines are not covered by any header
        let pending = pending_frame(b"*1\r\n:junk\r\n+more\r\n");
        assert_eq!(pending.unframed, 14);
    }
}
