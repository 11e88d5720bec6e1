//! Command-line entry point
//!
//! Usage: stream-splitter LISTEN_PORT UPSTREAM_HOST UPSTREAM_PORT UPSTREAM_PATH
//!
//! A listen port of 0 binds the default HTTP port 80. Log verbosity follows
//! `RUST_LOG`, defaulting to debug for this crate.
//!
//! Exit status is 1 when the origin is unreachable or goes away and 2 for any
//! other failure, such as the listen port being unavailable.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stream_splitter::{Relay, ServerConfig, UpstreamConfig};

/// Relay one HTTP stream to many clients
#[derive(Debug, Parser)]
#[command(name = "stream-splitter", version, about)]
struct Cli {
    /// Port to accept clients on (0 = 80)
    listen_port: u16,

    /// Origin host name or address
    upstream_host: String,

    /// Origin port
    upstream_port: u16,

    /// Resource path requested from the origin
    upstream_path: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stream_splitter=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server_config = ServerConfig::with_port(cli.listen_port);
    let upstream_config =
        UpstreamConfig::new(cli.upstream_host, cli.upstream_port, cli.upstream_path);

    tracing::info!(
        listen = %server_config.bind_addr,
        upstream = %upstream_config.addr(),
        path = %upstream_config.path,
        "Starting relay"
    );

    let relay = Relay::new(server_config, upstream_config);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    match relay.run_until(shutdown).await {
        Ok(()) => {
            tracing::info!("Relay stopped");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_upstream() => {
            tracing::error!(error = %e, "Relay stopped: upstream lost");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Relay stopped");
            ExitCode::from(2)
        }
    }
}
