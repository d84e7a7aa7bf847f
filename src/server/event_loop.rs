//! Single-Threaded Event Loop
//!
//! One thread owns the listening socket, every client socket and the store.
//! It blocks only inside `Poll::poll`, for at most the configured timeout,
//! and handles the reported events in order:
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │  poll(timeout)               │<──────────────┐
//!            └──────────────┬───────────────┘               │
//!                           │ events                        │
//!        ┌──────────────────┼────────────────────┐          │
//!        ▼                  ▼                    ▼          │
//!   LISTENER            client token           WAKER        │
//!   accept until        read / execute /       shutdown     │
//!   WouldBlock          flush, or disconnect   requested?   │
//!        │                  │                    │          │
//!        └──────────────────┴─────────┬──────────┘          │
//!                                     ▼                     │
//!                           read backlog, accept retry ─────┘
//! ```
//!
//! Each client turn reads at most one chunk. Connections that may still
//! hold unread bytes go on the read backlog and are served again after the
//! current batch of events; while the backlog is non-empty the poll does not
//! wait. This keeps one busy client from starving the others without losing
//! edge-triggered readiness.
//!
//! "Would block" is never an error here: it only means the next readiness
//! notification will carry on where this one stopped. Failing to register
//! a socket with the poller is fatal, since a socket the poller does not
//! know about would never be served or cleaned up.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionError, ConnectionStats};
use crate::server::ShutdownHandle;
use crate::storage::Store;
use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Token of the listening socket
const LISTENER: Token = Token(0);

/// Token of the shutdown waker
const WAKER: Token = Token(1);

/// First token handed out to a client connection
const FIRST_CLIENT_TOKEN: usize = 2;

/// Maximum number of events taken from one poll
const EVENTS_CAPACITY: usize = 1024;

/// Fatal server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The host/port pair did not resolve to a socket address
    #[error("could not resolve bind address {0}")]
    Resolve(String),

    /// The listening socket could not be created
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Waiting for readiness events failed
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// A socket could not be added to or updated in the readiness set
    #[error("failed to register socket with the poller: {0}")]
    Registration(#[source] io::Error),

    /// Any other I/O failure while setting up
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The connection multiplexer.
///
/// # Example
///
/// ```no_run
/// use pulsekv::config::ServerConfig;
/// use pulsekv::server::Server;
///
/// let server = Server::bind(ServerConfig::default())?;
/// let shutdown = server.shutdown_handle();
///
/// let worker = std::thread::spawn(move || server.run());
/// // ... later, from any thread:
/// shutdown.trigger();
/// worker.join().unwrap()?;
/// # Ok::<(), pulsekv::server::ServerError>(())
/// ```
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    /// Connections that may hold unread bytes
    read_backlog: HashSet<Token>,
    /// An accept failed with connections possibly still queued
    accept_retry: bool,
    next_token: usize,
    store: Store,
    config: ServerConfig,
    stats: Arc<ConnectionStats>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Binds the non-blocking listener and registers it with a new poller.
    ///
    /// The listener has address reuse enabled and a backlog well above 128.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = resolve(&config)?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            addr: config.bind_address(),
            source,
        })?;

        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Registration)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ServerError::Registration)?;

        info!(address = %listener.local_addr()?, "Listening");

        Ok(Self {
            poll,
            listener,
            connections: HashMap::new(),
            read_backlog: HashSet::new(),
            accept_retry: false,
            next_token: FIRST_CLIENT_TOKEN,
            store: Store::new(),
            config,
            stats: Arc::new(ConnectionStats::new()),
            shutdown: ShutdownHandle::new(waker),
        })
    }

    /// Binds to `host:port` with default settings and runs until shutdown.
    pub fn start(host: &str, port: u16) -> Result<(), ServerError> {
        Server::bind(ServerConfig::new(host, port))?.run()
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a handle that stops [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Shared connection statistics.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// The key-value store served by this server.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs the event loop until shutdown is requested or a fatal error
    /// occurs, then releases every socket and the poller.
    pub fn run(mut self) -> Result<(), ServerError> {
        info!("Event loop started");

        let result = self.event_loop();
        if let Err(e) = &result {
            error!(error = %e, "Event loop failed");
        }

        self.shutdown();
        result
    }

    fn event_loop(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.shutdown.is_triggered() {
            let timeout = if self.read_backlog.is_empty() {
                self.config.poll_timeout
            } else {
                Duration::ZERO
            };

            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServerError::Poll(e));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_new_connections()?,
                    WAKER => trace!("Woken up"),
                    token => self.handle_client_event(token, event)?,
                }
            }

            self.serve_read_backlog()?;
            self.retry_accepts()?;
        }

        Ok(())
    }

    /// Gives every backlogged connection one more turn.
    fn serve_read_backlog(&mut self) -> Result<(), ServerError> {
        let tokens: Vec<Token> = self.read_backlog.drain().collect();
        for token in tokens {
            self.service(token)?;
        }
        Ok(())
    }

    /// Accepts again after a failed accept, since the listener will not
    /// report connections that were already queued.
    fn retry_accepts(&mut self) -> Result<(), ServerError> {
        if self.accept_retry {
            self.accept_new_connections()?;
        }
        Ok(())
    }

    /// Accepts every pending connection until the listener would block.
    fn accept_new_connections(&mut self) -> Result<(), ServerError> {
        self.accept_retry = false;
        loop {
            // Accepted streams come back already in non-blocking mode
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // e.g. out of file descriptors; try again next turn
                    warn!(error = %e, "Failed to accept connection");
                    self.accept_retry = true;
                    return Ok(());
                }
            };

            let token = Token(self.next_token);
            self.next_token += 1;

            let mut conn = Connection::new(stream, addr, token, &self.config);
            conn.register(self.poll.registry())
                .map_err(ServerError::Registration)?;
            conn.queue_raw(self.config.greeting.as_bytes());

            self.stats.connection_opened();
            debug!(client = %addr, token = token.0, "Client connected");

            self.connections.insert(token, conn);
            self.service(token)?;
        }
    }

    /// Services one readiness event for a client socket.
    fn handle_client_event(&mut self, token: Token, event: &Event) -> Result<(), ServerError> {
        let Some(conn) = self.connections.get_mut(&token) else {
            // Already disconnected earlier in this batch
            trace!(token = token.0, "Event for a closed connection");
            return Ok(());
        };

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            conn.mark_readable();
        }

        self.service(token)
    }

    /// One turn for a client: drain replies, read once if there is room
    /// for more, then flush and settle the socket's interest.
    fn service(&mut self, token: Token) -> Result<(), ServerError> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };

        if let Err(e) = conn.flush(&self.stats) {
            log_connection_error(conn.addr(), &e);
        }

        if conn.wants_read() {
            if let Err(e) = conn.on_readable(&mut self.store, &self.stats) {
                log_connection_error(conn.addr(), &e);
            }
        }

        self.flush_or_close(token)?;

        if self
            .connections
            .get(&token)
            .is_some_and(Connection::wants_read)
        {
            self.read_backlog.insert(token);
        }
        Ok(())
    }

    /// Flushes queued replies, then either disconnects a closing connection
    /// or updates its write interest.
    fn flush_or_close(&mut self, token: Token) -> Result<(), ServerError> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };

        if let Err(e) = conn.flush(&self.stats) {
            log_connection_error(conn.addr(), &e);
        }

        if conn.is_closing() {
            self.disconnect(token);
            return Ok(());
        }

        conn.update_interest(self.poll.registry())
            .map_err(ServerError::Registration)
    }

    /// Deregisters and closes a client socket. Unknown tokens are ignored,
    /// so a second call for the same connection does nothing.
    fn disconnect(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        self.read_backlog.remove(&token);

        if let Err(e) = conn.deregister(self.poll.registry()) {
            debug!(client = %conn.addr(), error = %e, "Deregister failed");
        }

        self.stats.connection_closed();
        debug!(client = %conn.addr(), token = token.0, "Client disconnected");
        // Dropping `conn` closes the socket
    }

    /// Closes every client socket, the listener and the poller.
    ///
    /// Taking `self` by value makes a second shutdown impossible.
    fn shutdown(mut self) {
        info!(
            connections = self.connections.len(),
            "Shutting the server down"
        );

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.disconnect(token);
        }

        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            debug!(error = %e, "Listener deregister failed");
        }

        let Server { poll, listener, .. } = self;
        drop(listener);
        drop(poll);

        info!("Server stopped");
    }
}

fn resolve(config: &ServerConfig) -> Result<SocketAddr, ServerError> {
    (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|source| ServerError::Bind {
            addr: config.bind_address(),
            source,
        })?
        .next()
        .ok_or_else(|| ServerError::Resolve(config.bind_address()))
}

fn log_connection_error(addr: SocketAddr, error: &ConnectionError) {
    match error {
        ConnectionError::IoError(io_err)
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
            ) =>
        {
            debug!(client = %addr, "Connection reset by client")
        }
        _ => warn!(client = %addr, error = %error, "Connection error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::atomic::Ordering;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    const GREETING: &[u8] = b"Welcome to PulseKV\r\n";

    struct TestServer {
        addr: SocketAddr,
        shutdown: ShutdownHandle,
        stats: Arc<ConnectionStats>,
        worker: Option<JoinHandle<Result<(), ServerError>>>,
    }

    impl TestServer {
        fn start() -> Self {
            let config =
                ServerConfig::new("127.0.0.1", 0).with_poll_timeout(Duration::from_millis(10));
            let server = Server::bind(config).unwrap();

            Self {
                addr: server.local_addr().unwrap(),
                shutdown: server.shutdown_handle(),
                stats: server.stats(),
                worker: Some(thread::spawn(move || server.run())),
            }
        }

        /// Connects and consumes the greeting.
        fn connect(&self) -> TcpStream {
            let mut client = TcpStream::connect(self.addr).unwrap();
            client
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            assert_eq!(read_n(&mut client, GREETING.len()), GREETING);
            client
        }

        fn stop(&mut self) -> Result<(), ServerError> {
            self.shutdown.trigger();
            match self.worker.take() {
                Some(worker) => worker.join().unwrap(),
                None => Ok(()),
            }
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            let _ = self.stop();
        }
    }

    fn read_n(client: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        client.read_exact(&mut buf).unwrap();
        buf
    }

    fn request(client: &mut TcpStream, request: &[u8], expected: &[u8]) {
        client.write_all(request).unwrap();
        assert_eq!(
            read_n(client, expected.len()),
            expected,
            "reply to {:?}",
            String::from_utf8_lossy(request)
        );
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_greeting_and_ping() {
        let server = TestServer::start();
        let mut client = server.connect();

        request(&mut client, b"PING\r\n", b"+PONG\r\n");
        request(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n");
        request(&mut client, b"PING extra args\r\n", b"+PONG\r\n");
    }

    #[test]
    fn test_set_get_echo() {
        let server = TestServer::start();
        let mut client = server.connect();

        request(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n",
            b"+OK\r\n",
        );
        request(&mut client, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n", b"$4\r\nAriz\r\n");
        request(&mut client, b"GET missing\r\n", b"$-1\r\n");
        request(&mut client, b"ECHO hello\r\n", b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_errors_keep_connection_usable() {
        let server = TestServer::start();
        let mut client = server.connect();

        request(
            &mut client,
            b"GET\r\n",
            b"-ERR wrong number of arguments for 'get' command\r\n",
        );
        request(
            &mut client,
            b"ECHO\r\n",
            b"-ERR wrong number of arguments for 'echo' command\r\n",
        );
        request(&mut client, b"SET k v EX soon\r\n", b"-ERR value is not an integer or out of range\r\n");
        request(&mut client, b"NOPE\r\n", b"-ERR unknown command 'NOPE'\r\n");
        request(&mut client, b"SET k v\r\n", b"+OK\r\n");
        request(&mut client, b"GET k\r\n", b"$1\r\nv\r\n");
    }

    #[test]
    fn test_expiry_over_the_wire() {
        let server = TestServer::start();
        let mut client = server.connect();

        request(&mut client, b"SET k v EX 0\r\n", b"+OK\r\n");
        request(&mut client, b"GET k\r\n", b"$-1\r\n");

        request(&mut client, b"SET k v PX 30\r\n", b"+OK\r\n");
        thread::sleep(Duration::from_millis(60));
        request(&mut client, b"GET k\r\n", b"$-1\r\n");
    }

    #[test]
    fn test_fragmented_request() {
        let server = TestServer::start();
        let mut client = server.connect();

        client.write_all(b"*2\r\n$4\r\nEC").unwrap();
        thread::sleep(Duration::from_millis(30));
        client.write_all(b"HO\r\n$3\r\nabc").unwrap();
        thread::sleep(Duration::from_millis(30));
        request(&mut client, b"\r\n", b"$3\r\nabc\r\n");
    }

    #[test]
    fn test_large_value_round_trip() {
        let server = TestServer::start();
        let mut client = server.connect();

        let value = "v".repeat(100 * 1024);
        let set = format!("*3\r\n$3\r\nSET\r\n$1\r\nk\r\n${}\r\n{}\r\n", value.len(), value);
        request(&mut client, set.as_bytes(), b"+OK\r\n");

        let reply = format!("${}\r\n{}\r\n", value.len(), value);
        request(&mut client, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", reply.as_bytes());
        request(&mut client, b"PING\r\n", b"+PONG\r\n");
    }

    #[test]
    fn test_pipelining_client_does_not_starve_others() {
        let server = TestServer::start();
        let mut busy = server.connect();
        let mut other = server.connect();

        let payload = "a".repeat(50);
        let frame = format!("*2\r\n$4\r\nECHO\r\n$50\r\n{}\r\n", payload);
        let reply = format!("$50\r\n{}\r\n", payload);
        let count = 2000;

        let mut writer = busy.try_clone().unwrap();
        let requests = frame.repeat(count);
        let sender = thread::spawn(move || writer.write_all(requests.as_bytes()));

        request(&mut other, b"PING\r\n", b"+PONG\r\n");

        let replies = read_n(&mut busy, reply.len() * count);
        assert_eq!(replies, reply.repeat(count).into_bytes());
        sender.join().unwrap().unwrap();
    }

    #[test]
    fn test_clients_share_the_store() {
        let server = TestServer::start();
        let mut first = server.connect();
        let mut second = server.connect();

        request(&mut first, b"SET shared 42\r\n", b"+OK\r\n");
        request(&mut second, b"GET shared\r\n", b"$2\r\n42\r\n");
        request(&mut second, b"SET shared 43\r\n", b"+OK\r\n");
        request(&mut first, b"GET shared\r\n", b"$2\r\n43\r\n");
    }

    #[test]
    fn test_peer_close_disconnects_once() {
        let server = TestServer::start();
        let client = server.connect();
        let stats = Arc::clone(&server.stats);

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        drop(client);

        assert!(wait_for(|| stats.active_connections.load(Ordering::Relaxed) == 0));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(stats.connections_closed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_shutdown_closes_all_connections() {
        let mut server = TestServer::start();
        let mut first = server.connect();
        let mut second = server.connect();

        server.stop().unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(first.read(&mut buf).unwrap(), 0);
        assert_eq!(second.read(&mut buf).unwrap(), 0);
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(server.stats.connections_closed.load(Ordering::Relaxed), 2);

        // Stopping again is harmless
        server.shutdown.trigger();
        assert!(server.stop().is_ok());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut server = Server::bind(ServerConfig::new("127.0.0.1", 0)).unwrap();
        let _client = TcpStream::connect(server.local_addr().unwrap()).unwrap();

        assert!(wait_for(|| {
            server.accept_new_connections().unwrap();
            server.connection_count() == 1
        }));

        let token = Token(FIRST_CLIENT_TOKEN);
        server.disconnect(token);
        server.disconnect(token);

        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.stats.connections_closed.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_failed_accept_is_retried_without_new_events() {
        let mut server = Server::bind(ServerConfig::new("127.0.0.1", 0)).unwrap();
        let _client = TcpStream::connect(server.local_addr().unwrap()).unwrap();

        // Nothing polled: only the retry path can pick the client up
        server.retry_accepts().unwrap();
        assert_eq!(server.connection_count(), 0);

        assert!(wait_for(|| {
            server.accept_retry = true;
            server.retry_accepts().unwrap();
            server.connection_count() == 1
        }));
        assert!(!server.accept_retry);
    }

    #[test]
    fn test_bind_error() {
        let first = Server::bind(ServerConfig::new("127.0.0.1", 0)).unwrap();
        let port = first.local_addr().unwrap().port();

        let result = Server::bind(ServerConfig::new("127.0.0.1", port));
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
