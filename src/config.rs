//! Server Configuration
//!
//! Host and port are the only settings exposed on the command line; the
//! remaining knobs exist for embedding and tests.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while reading command-line arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A flag that takes a value was last on the command line
    #[error("{0} requires a value")]
    MissingValue(String),

    /// The port was not a number in 0..=65535
    #[error("invalid port number: {0}")]
    InvalidPort(String),

    /// Anything not listed in the help text
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Start the server
    Run(ServerConfig),
    /// Print usage and exit
    Help,
    /// Print the version and exit
    Version,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Longest single wait for readiness events
    pub poll_timeout: Duration,
    /// Size of each individual socket read
    pub read_chunk_size: usize,
    /// Bound on buffered input not covered by a bulk header, and the reply
    /// backlog above which a connection stops reading
    pub max_buffer_size: usize,
    /// Banner sent to every client right after accept
    pub greeting: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            poll_timeout: Duration::from_millis(100),
            read_chunk_size: 1024,
            max_buffer_size: 64 * 1024,
            greeting: "Welcome to PulseKV\r\n".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses command-line arguments, excluding the program name.
    ///
    /// # Example
    ///
    /// ```
    /// use pulsekv::config::{CliCommand, ServerConfig};
    ///
    /// let args = ["--port", "6380"].map(String::from);
    /// match ServerConfig::from_args(args).unwrap() {
    ///     CliCommand::Run(config) => assert_eq!(config.bind_address(), "127.0.0.1:6380"),
    ///     other => panic!("unexpected {:?}", other),
    /// }
    /// ```
    pub fn from_args<I>(args: I) -> Result<CliCommand, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = ServerConfig::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => {
                    config.host = args.next().ok_or(ConfigError::MissingValue(arg))?;
                }
                "--port" | "-p" => {
                    let value = args.next().ok_or(ConfigError::MissingValue(arg))?;
                    config.port = value.parse().map_err(|_| ConfigError::InvalidPort(value))?;
                }
                "--help" => return Ok(CliCommand::Help),
                "--version" | "-v" => return Ok(CliCommand::Version),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(CliCommand::Run(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliCommand, ConfigError> {
        ServerConfig::from_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:5000");
        assert_eq!(config.read_chunk_size, 1024);
        assert!(config.greeting.ends_with("\r\n"));
        assert_eq!(parse(&[]), Ok(CliCommand::Run(config)));
    }

    #[test]
    fn test_host_and_port() {
        let expected = ServerConfig::new("0.0.0.0", 6380);
        assert_eq!(
            parse(&["--host", "0.0.0.0", "-p", "6380"]),
            Ok(CliCommand::Run(expected.clone()))
        );
        assert_eq!(
            parse(&["-h", "0.0.0.0", "--port", "6380"]),
            Ok(CliCommand::Run(expected))
        );
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&["--help"]), Ok(CliCommand::Help));
        assert_eq!(parse(&["-p", "1", "-v"]), Ok(CliCommand::Version));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse(&["--port"]),
            Err(ConfigError::MissingValue("--port".to_string()))
        );
        assert_eq!(
            parse(&["--port", "70000"]),
            Err(ConfigError::InvalidPort("70000".to_string()))
        );
        assert_eq!(
            parse(&["--verbose"]),
            Err(ConfigError::UnknownArgument("--verbose".to_string()))
        );
    }

    #[test]
    fn test_builders() {
        let config = ServerConfig::new("localhost", 1)
            .with_poll_timeout(Duration::from_millis(5))
            .with_read_chunk_size(16)
            .with_max_buffer_size(128)
            .with_greeting("hey\r\n");

        assert_eq!(config.poll_timeout, Duration::from_millis(5));
        assert_eq!(config.read_chunk_size, 16);
        assert_eq!(config.max_buffer_size, 128);
        assert_eq!(config.greeting, "hey\r\n");
    }
}
