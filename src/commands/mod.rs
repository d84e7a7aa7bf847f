//! Command Handler Module
//!
//! This module implements the command processing layer.
//! It receives parsed commands, executes them against the store,
//! and returns the reply to write back.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Parser         │  (protocol module)
//! └────────┬────────┘
//!          │ ParsedCommand
//!          ▼
//! ┌─────────────────┐
//! │ COMMAND_TABLE   │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - Arity check  │
//! │  - Execute      │
//! └────────┬────────┘
//!          │ &mut Store
//!          ▼
//! ┌─────────────────┐
//! │ Store           │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `ECHO`
//! - `SET` (with `EX` / `PX`), `GET`

pub mod handler;

pub use handler::{execute, lookup, CommandArity, CommandFn, CommandSpec, COMMAND_TABLE};
