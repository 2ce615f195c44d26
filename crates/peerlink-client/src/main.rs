//! peerlink CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use peerlink_client::cli::{Cli, run_interactive};
use peerlink_client::{ChatClient, ClientConfig, ClientResult};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new(Level::DEBUG.to_string())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::WARN.to_string()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config = ClientConfig::new(&cli.nickname)
        .with_server(&cli.server_host, cli.server_port)
        .with_request_timeout(Duration::from_secs(cli.request_timeout));

    let (client, events) = ChatClient::connect(config).await?;
    run_interactive(client, events).await
}
