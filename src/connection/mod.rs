//! Connection Module
//!
//! This module manages the per-client state of the event loop. Every
//! accepted socket becomes a [`Connection`] owned by the server; the event
//! loop calls into it whenever the poller reports the socket ready.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Event Loop (server module)                 │
//! │                                                             │
//! │      readable event                  writable event         │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Connection                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Parse frame │───>│ Execute cmd │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Queue reply │──> flush
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Non-blocking I/O**: Every socket call returns instead of waiting
//! - **Reassembly**: Requests split across reads are buffered until complete
//! - **Pipelining**: Multiple commands in a single read are all executed
//! - **Statistics**: Tracks connection and command metrics

pub mod handler;
pub mod stats;

// Re-export commonly used types
pub use handler::{Connection, ConnectionError, ConnectionState};
pub use stats::ConnectionStats;
