//! # PulseKV - A Small Event-Driven In-Memory Key-Value Server
//!
//! PulseKV is an in-memory key-value server reachable over TCP with a
//! Redis-like request/response protocol. A single thread multiplexes every
//! client socket through one readiness loop, so no socket can block another
//! and the store needs no locks.
//!
//! ## Features
//!
//! - **Two request encodings**: length-prefixed arrays and inline text
//! - **Stream reassembly**: requests split across reads are buffered
//! - **TTL Support**: Keys can expire; expired keys are removed on read
//! - **Non-blocking I/O**: Built on `mio` readiness polling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              PulseKV                                │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐              │
//! │  │ Event Loop  │───>│ Connection  │───>│  Command    │              │
//! │  │ (mio Poll)  │    │  buffers    │    │  Table      │              │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘              │
//! │                            │                  │                     │
//! │                            ▼                  ▼                     │
//! │                     ┌─────────────┐    ┌─────────────┐              │
//! │                     │   Parser    │    │    Store    │              │
//! │                     └─────────────┘    └─────────────┘              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use pulsekv::config::ServerConfig;
//! use pulsekv::server::Server;
//!
//! let server = Server::bind(ServerConfig::default())?;
//! let shutdown = server.shutdown_handle();
//!
//! let worker = std::thread::spawn(move || server.run());
//!
//! // e.g. from a signal handler
//! shutdown.trigger();
//! worker.join().unwrap()?;
//! # Ok::<(), pulsekv::server::ServerError>(())
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `GET key`
//!
//! ## Module Overview
//!
//! - [`protocol`]: Request parser and reply types
//! - [`storage`]: Key-value store with lazy expiry
//! - [`commands`]: Command table and handlers
//! - [`connection`]: Per-client buffers and state
//! - [`server`]: The readiness loop and shutdown handle
//! - [`config`]: Server settings and argument parsing

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{CliCommand, ConfigError, ServerConfig};
pub use connection::{Connection, ConnectionStats};
pub use protocol::{parse_command, parse_frame, ParseError, ParsedCommand, RespValue};
pub use server::{Server, ServerError, ShutdownHandle};
pub use storage::Store;

/// The default port the server listens on
pub const DEFAULT_PORT: u16 = 5000;

/// The default host the server binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of PulseKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
