//! Connection Handler Module
//!
//! This module owns the per-client side of the event loop: one
//! [`Connection`] per accepted socket, holding the socket itself plus the
//! read and write buffers that outlive a single readiness event.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. accept()                      (CONNECTING, inside the accept handler)
//!        │
//!        ▼
//! 2. register READABLE, greet      (ESTABLISHED)
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  readable:                   │
//!    │    one bounded read          │
//!    │    parse complete frames     │
//!    │    execute, queue replies    │
//!    │  writable:                   │
//!    │    flush queued replies      │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. zero-length read / I/O error  (CLOSING)
//!        │
//!        ▼
//! 5. deregister + drop             (CLOSED, owned by the event loop)
//! ```
//!
//! ## Buffer Management
//!
//! TCP is a stream protocol: one read may carry half a command or several
//! of them. Incoming bytes accumulate in a `BytesMut` and only complete
//! frames are consumed from its front. Replies accumulate in a second
//! buffer that is flushed until the socket would block; whatever is left
//! waits for the next writable event.
//!
//! Both buffers are bounded by `max_buffer_size`:
//!
//! - Reading pauses while queued replies exceed it, and resumes once a
//!   flush brings them back under.
//! - Incoming bytes not covered by a parsed `$<len>` header may not exceed
//!   it. Declared bulk payloads may, up to [`MAX_BULK_SIZE`] per request.
//!
//! ## Read Backlog
//!
//! Readiness is edge-triggered, but each turn performs a single bounded
//! read. A connection therefore remembers that its socket may still hold
//! data (see [`Connection::wants_read`]) until a read reports WouldBlock,
//! and the event loop keeps serving it without waiting for a new event.

use crate::commands;
use crate::config::ServerConfig;
use crate::connection::ConnectionStats;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::types::prefix;
use crate::protocol::{
    parse_command, parse_frame, pending_frame, ParseError, ParsedCommand, RespValue,
};
use crate::storage::Store;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Where a connection is in its lifecycle.
///
/// `CONNECTING` only exists inside the accept handler and `CLOSED` is the
/// connection being removed from the event loop, so neither is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered and serving commands
    Established,
    /// Peer shut down or the socket failed; awaiting cleanup
    Closing,
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// A single accepted client socket and its buffers.
pub struct Connection {
    /// The non-blocking client socket
    stream: TcpStream,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Poll token identifying this socket
    token: Token,

    /// Bytes received but not yet parsed into a complete command
    read_buf: BytesMut,

    /// Serialized replies not yet accepted by the socket
    write_buf: BytesMut,

    /// Scratch space for a single bounded read
    chunk: Vec<u8>,

    /// Bound on unframed input and on queued replies
    max_buffer_size: usize,

    /// The socket may hold bytes no read has picked up yet
    read_pending: bool,

    /// Whether WRITABLE interest is currently registered
    write_interest: bool,

    state: ConnectionState,
}

impl Connection {
    /// Wraps a freshly accepted, non-blocking socket.
    pub fn new(stream: TcpStream, addr: SocketAddr, token: Token, config: &ServerConfig) -> Self {
        Self {
            stream,
            addr,
            token,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            write_buf: BytesMut::new(),
            chunk: vec![0; config.read_chunk_size.max(1)],
            max_buffer_size: config.max_buffer_size,
            read_pending: false,
            write_interest: false,
            state: ConnectionState::Established,
        }
    }

    /// Client's socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll token for this connection.
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closing(&self) -> bool {
        self.state == ConnectionState::Closing
    }

    /// Returns true if replies are still waiting for the socket.
    pub fn has_pending_writes(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Registers the socket for read readiness.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, Interest::READABLE)
    }

    /// Removes the socket from the poller.
    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Queues raw bytes (the greeting banner) ahead of any reply.
    pub fn queue_raw(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }

    /// Records a readable event from the poller.
    pub fn mark_readable(&mut self) {
        self.read_pending = true;
    }

    /// Returns true if the socket may hold unread bytes and there is room
    /// for the replies they would produce.
    pub fn wants_read(&self) -> bool {
        self.read_pending
            && self.state == ConnectionState::Established
            && self.write_buf.len() < self.max_buffer_size
    }

    /// Performs one bounded read and executes every command it completes.
    ///
    /// The socket counts as drained only once a read reports WouldBlock; at
    /// that point a leftover inline fragment is executed as a whole request.
    /// A zero-length read moves the connection to [`ConnectionState::Closing`].
    pub fn on_readable(
        &mut self,
        store: &mut Store,
        stats: &ConnectionStats,
    ) -> Result<(), ConnectionError> {
        match self.stream.read(&mut self.chunk) {
            Ok(0) => {
                trace!(client = %self.addr, "Peer closed its write half");
                self.read_pending = false;
                self.finish_batch(store, stats);
                self.state = ConnectionState::Closing;
                Ok(())
            }
            Ok(n) => {
                stats.bytes_read(n);
                trace!(client = %self.addr, bytes = n, "Read data");
                self.read_pending = true;
                self.read_buf.extend_from_slice(&self.chunk[..n]);
                self.process_frames(store, stats);
                self.enforce_read_limit();
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.read_pending = false;
                self.finish_batch(store, stats);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.read_pending = true;
                Ok(())
            }
            Err(e) => {
                self.read_pending = false;
                self.state = ConnectionState::Closing;
                Err(e.into())
            }
        }
    }

    /// Writes queued replies until the socket would block.
    pub fn flush(&mut self, stats: &ConnectionStats) -> Result<(), ConnectionError> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    self.state = ConnectionState::Closing;
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
                Ok(n) => {
                    self.write_buf.advance(n);
                    stats.bytes_written(n);
                    trace!(client = %self.addr, bytes = n, "Sent response");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.state = ConnectionState::Closing;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Adds or drops WRITABLE interest depending on pending replies.
    pub fn update_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let want_write = self.has_pending_writes();
        if want_write == self.write_interest {
            return Ok(());
        }

        let interest = if want_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        registry.reregister(&mut self.stream, self.token, interest)?;
        self.write_interest = want_write;
        Ok(())
    }

    /// Executes every complete frame at the front of the read buffer.
    fn process_frames(&mut self, store: &mut Store, stats: &ConnectionStats) {
        loop {
            match parse_frame(&self.read_buf) {
                Ok(Some((command, consumed))) => {
                    self.read_buf.advance(consumed);
                    trace!(
                        client = %self.addr,
                        consumed = consumed,
                        remaining = self.read_buf.len(),
                        "Parsed command"
                    );
                    self.run(&command, store, stats);
                }
                Ok(None) => return,
                Err(e) => {
                    self.reject(e);
                    return;
                }
            }
        }
    }

    /// Drops an incomplete request that outgrew its limits.
    ///
    /// The client gets an error reply and the connection stays open; bytes
    /// of the dropped request that arrive later are parsed afresh.
    fn enforce_read_limit(&mut self) {
        if self.read_buf.len() <= self.max_buffer_size {
            return;
        }

        let pending = pending_frame(&self.read_buf);
        if pending.unframed <= self.max_buffer_size && pending.declared <= MAX_BULK_SIZE {
            return;
        }

        warn!(
            client = %self.addr,
            buffered = self.read_buf.len(),
            declared = pending.declared,
            unframed = pending.unframed,
            "Request too large, discarding"
        );
        self.read_buf.clear();
        self.queue_reply(&RespValue::error("ERR Protocol error: request too large"));
    }

    /// Called when no more bytes are available right now.
    ///
    /// An inline request needs no terminator beyond the end of what the
    /// transport delivered, so a leftover inline fragment runs as-is.
    /// Partial array requests stay buffered.
    fn finish_batch(&mut self, store: &mut Store, stats: &ConnectionStats) {
        if self.read_buf.is_empty() || self.read_buf[0] == prefix::ARRAY {
            return;
        }

        let fragment = self.read_buf.split();
        match parse_command(&fragment) {
            Ok(command) => self.run(&command, store, stats),
            Err(e) => self.reject(e),
        }
    }

    fn run(&mut self, command: &ParsedCommand, store: &mut Store, stats: &ConnectionStats) {
        if let Some(reply) = commands::execute(command, store) {
            trace!(client = %self.addr, command = %command.name, reply = %reply, "Executed");
            stats.command_processed();
            self.queue_reply(&reply);
        }
    }

    /// Replies with a protocol error and drops the unparseable bytes.
    fn reject(&mut self, error: ParseError) {
        warn!(client = %self.addr, error = %error, "Parse error");
        self.read_buf.clear();
        self.queue_reply(&RespValue::error(format!("ERR Protocol error: {}", error)));
    }

    fn queue_reply(&mut self, reply: &RespValue) {
        reply.serialize_into(&mut self.write_buf);
    }
}
