//! Command Table and Handlers
//!
//! Every supported command is one [`CommandSpec`] entry in a static table:
//! its name, its arity and a plain function that executes it against the
//! store. Arity is checked once in [`execute`] before the handler runs.
//!
//! ## Supported Commands
//!
//! - `PING [anything ...]` - Always replies `+PONG`
//! - `ECHO message` - Replies with `message` as a bulk string
//! - `SET key value [EX seconds | PX milliseconds]` - Set a key
//! - `GET key` - Get a key's value, or the null bulk string
//!
//! Handlers never fail across the connection boundary: every problem
//! becomes an `-ERR` reply and the store is left untouched.

use crate::protocol::{ParsedCommand, RespValue};
use crate::storage::Store;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Handler function signature shared by every table entry.
pub type CommandFn = fn(&[Bytes], &mut Store) -> RespValue;

/// Arity constraints for a command, counted without the command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandArity {
    /// Command must have exactly this many arguments.
    Exact(usize),
    /// Command must have at least this many arguments.
    AtLeast(usize),
}

impl CommandArity {
    /// Returns true if `argc` arguments satisfy this constraint.
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            CommandArity::Exact(n) => argc == n,
            CommandArity::AtLeast(n) => argc >= n,
        }
    }
}

/// Metadata and callback for one command table entry.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Canonical uppercase command name.
    pub name: &'static str,
    /// Arity constraint checked before dispatch.
    pub arity: CommandArity,
    /// Handler callback.
    pub handler: CommandFn,
}

/// All commands understood by the server.
pub static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        name: "PING",
        arity: CommandArity::AtLeast(0),
        handler: cmd_ping,
    },
    CommandSpec {
        name: "ECHO",
        arity: CommandArity::Exact(1),
        handler: cmd_echo,
    },
    CommandSpec {
        name: "SET",
        arity: CommandArity::AtLeast(2),
        handler: cmd_set,
    },
    CommandSpec {
        name: "GET",
        arity: CommandArity::Exact(1),
        handler: cmd_get,
    },
];

/// Finds the table entry for an upper-cased command name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|spec| spec.name == name)
}

/// Executes a parsed command and returns the reply to send.
///
/// Returns `None` for an empty command, which gets no reply at all.
///
/// # Example
///
/// ```
/// use pulsekv::commands::execute;
/// use pulsekv::protocol::{parse_command, RespValue};
/// use pulsekv::storage::Store;
///
/// let mut store = Store::new();
/// let reply = execute(&parse_command(b"PING").unwrap(), &mut store);
/// assert_eq!(reply, Some(RespValue::pong()));
/// ```
pub fn execute(command: &ParsedCommand, store: &mut Store) -> Option<RespValue> {
    if command.is_empty() {
        return None;
    }

    let reply = match lookup(&command.name) {
        Some(spec) if spec.arity.accepts(command.args.len()) => {
            (spec.handler)(&command.args, store)
        }
        Some(spec) => wrong_arity(spec.name),
        None => RespValue::error(format!("ERR unknown command '{}'", command.name)),
    };

    Some(reply)
}

fn wrong_arity(name: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_lowercase()
    ))
}

fn syntax_error() -> RespValue {
    RespValue::error("ERR syntax error")
}

fn not_an_integer() -> RespValue {
    RespValue::error("ERR value is not an integer or out of range")
}

/// PING [anything ...]
fn cmd_ping(_args: &[Bytes], _store: &mut Store) -> RespValue {
    RespValue::pong()
}

/// ECHO message
fn cmd_echo(args: &[Bytes], _store: &mut Store) -> RespValue {
    RespValue::bulk_string(args[0].clone())
}

/// GET key
fn cmd_get(args: &[Bytes], store: &mut Store) -> RespValue {
    match store.get(&args[0]) {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null(),
    }
}

/// Expiry requested by a SET option, in signed milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TtlMillis(i64);

impl TtlMillis {
    /// Converts the relative TTL into an absolute deadline.
    ///
    /// Zero and negative TTLs yield `now`, which is already expired.
    fn deadline_from(self, now: Instant) -> Option<Instant> {
        if self.0 <= 0 {
            return Some(now);
        }
        now.checked_add(Duration::from_millis(self.0 as u64))
    }
}

/// SET key value [EX seconds | PX milliseconds]
///
/// Options are validated in full before the store is touched.
fn cmd_set(args: &[Bytes], store: &mut Store) -> RespValue {
    let key = args[0].clone();
    let value = args[1].clone();

    let mut ttl: Option<TtlMillis> = None;

    let mut i = 2;
    while i < args.len() {
        let opt = String::from_utf8_lossy(&args[i]).to_uppercase();

        let scale = match opt.as_str() {
            "EX" => 1000,
            "PX" => 1,
            _ => return syntax_error(),
        };

        i += 1;
        let Some(raw) = args.get(i) else {
            return syntax_error();
        };

        let amount = match parse_integer(raw) {
            Some(n) => n,
            None => return not_an_integer(),
        };

        ttl = match amount.checked_mul(scale) {
            Some(ms) => Some(TtlMillis(ms)),
            None => return not_an_integer(),
        };
        i += 1;
    }

    match ttl {
        Some(ttl) => match ttl.deadline_from(Instant::now()) {
            Some(deadline) => store.set_with_deadline(key, value, deadline),
            None => return not_an_integer(),
        },
        None => store.set(key, value),
    }

    RespValue::ok()
}

fn parse_integer(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}
