//! Server Module
//!
//! The connection multiplexer: a single thread polling the listener and
//! every client socket for readiness, plus the handle used to stop it.
//!
//! ## Example
//!
//! ```no_run
//! use pulsekv::server::Server;
//!
//! // Blocks until the process is stopped
//! Server::start("127.0.0.1", 5000)?;
//! # Ok::<(), pulsekv::server::ServerError>(())
//! ```

pub mod event_loop;
pub mod shutdown;

pub use event_loop::{Server, ServerError};
pub use shutdown::ShutdownHandle;
