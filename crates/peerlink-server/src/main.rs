//! peerlink-server entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{Level, warn};
use tracing_subscriber::EnvFilter;

use peerlink_server::{Broker, BrokerServer, ServerConfig, ServerResult};

/// Rendezvous and broadcast server for peerlink clients.
#[derive(Debug, Parser)]
#[command(name = "peerlink-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to bind and advertise to clients
    #[arg(long, default_value = "127.0.0.1", env = "PEERLINK_HOST")]
    host: String,

    /// TCP port to listen on
    #[arg(long, short, default_value_t = 8888, env = "PEERLINK_PORT")]
    port: u16,

    /// Maximum concurrent client connections
    #[arg(long, default_value_t = 100)]
    max_connections: usize,

    /// Enable debug output
    #[arg(long, short = 'v')]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new(Level::DEBUG.to_string())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> ServerResult<()> {
    let config = ServerConfig::new(args.host, args.port).with_max_connections(args.max_connections);
    let broker = Arc::new(Broker::new(config.host.clone()));
    let server = BrokerServer::bind(config).await?;

    server
        .run_until_shutdown(broker, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to install ctrl-c handler");
            }
        })
        .await
}
