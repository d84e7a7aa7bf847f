//! PulseKV - A Small Event-Driven In-Memory Key-Value Server
//!
//! This is the main entry point for the PulseKV server.
//! It reads the configuration, sets up logging, runs the event loop on its
//! own thread and stops it on Ctrl+C.

use anyhow::Context;
use pulsekv::config::{CliCommand, ServerConfig};
use pulsekv::server::Server;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!(
        r#"
PulseKV - A Small Event-Driven In-Memory Key-Value Server

USAGE:
    pulsekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>    Host to bind to (default: {host})
    -p, --port <PORT>    Port to listen on (default: {port})
    -v, --version        Print version information
        --help           Print this help message

EXAMPLES:
    pulsekv                        # Start on {host}:{port}
    pulsekv --port 6380            # Start on port 6380
    pulsekv --host 0.0.0.0         # Listen on all interfaces

CONNECTING:
    Use redis-cli, nc or telnet:
    $ redis-cli -p {port}
    127.0.0.1:{port}> SET name "Ariz" EX 60
    OK
    127.0.0.1:{port}> GET name
    "Ariz"
"#,
        host = pulsekv::DEFAULT_HOST,
        port = pulsekv::DEFAULT_PORT,
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = match ServerConfig::from_args(std::env::args().skip(1)) {
        Ok(CliCommand::Run(config)) => config,
        Ok(CliCommand::Help) => {
            print_help();
            return Ok(());
        }
        Ok(CliCommand::Version) => {
            println!("PulseKV version {}", pulsekv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!(version = pulsekv::VERSION, "Starting PulseKV");

    let server = Server::bind(config.clone())
        .with_context(|| format!("failed to start server on {}", config.bind_address()))?;
    let shutdown = server.shutdown_handle();

    // The event loop owns every socket and the store; it gets its own thread
    let mut worker = tokio::task::spawn_blocking(move || server.run());

    info!("Ready to accept connections. Use Ctrl+C to shut down.");

    let result = tokio::select! {
        result = &mut worker => result,
        signal = signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server...");
            shutdown.trigger();
            worker.await
        }
    };

    result.context("event loop thread panicked")??;

    info!("Server shutdown complete");
    Ok(())
}
